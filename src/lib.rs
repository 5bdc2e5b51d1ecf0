//! Mirror remote repositories and catalog the resources inside them.
//!
//! [`scrape`] is the whole job for one repository: bring its mirror up to
//! date with [`trawl_retrieve::Engine`], then walk the mirror with a
//! [`trawl_scan::Pipeline`] that builds a manifest and metadata for every
//! resource. Nothing is thrown at the caller; every failure ends up in
//! [`Scrape::problems`], tagged with the [`Phase`] it happened in.
//!
//! [`rescan`] repeats the walk over an existing mirror without retrieving or
//! generating anything, reusing the metadata artifacts of the last scrape.

use std::time::Duration;
use tracing::{info, instrument, warn};
use trawl_config::Config;
use trawl_retrieve::{Engine, LocalMirror, RepositoryDescriptor, RepositoryKind, Tools};
use trawl_scan::{CommandGenerator, Generator, ManifestScanner, MetadataScanner, Mode, NameScanner, Pipeline, Union};

pub use trawl_scan::{Phase, Problem, Resource, ResourceKind, Severity};

/// What one scrape achieved.
#[derive(Clone, Debug, Default)]
pub struct Scrape {
    /// No error-severity problem was recorded.
    pub success: bool,
    /// Retrieval changed the mirror.
    pub changed: bool,
    /// The revision actually retrieved, once known.
    pub revision: Option<String>,
    /// Every resource that scanned cleanly (possibly with warnings).
    pub resources: Vec<Resource>,
    pub problems: Vec<Problem>,
    /// Diagnostic notes from the retrieval engine.
    pub notes: Vec<String>,
}

impl Scrape {
    fn problem(&mut self, problem: Problem) {
        match problem.severity {
            Severity::Error => warn!(phase = %problem.phase, error = %problem.error, "{}", problem.explanation),
            Severity::Warning => info!(phase = %problem.phase, warning = %problem.error, "{}", problem.explanation),
        }
        self.problems.push(problem);
    }

    fn finish(mut self) -> Self {
        self.success = !self.problems.iter().any(Problem::is_error);
        info!(
            success = self.success,
            changed = self.changed,
            resources = self.resources.len(),
            problems = self.problems.len(),
            "scrape finished"
        );
        self
    }
}

/// The tool context described by `config`, to be shared between scrapes so
/// each tool is probed once.
pub fn tools(config: &Config) -> Tools {
    Tools::new(config.supervisor(), config.probe_timeout())
}

/// Retrieve `descriptor` into its mirror and catalog the resources of the
/// given `kinds` found there.
///
/// Metadata is generated where a resource lacks a descriptor, so the
/// mirror's artifact directory is emptied first.
#[instrument(skip_all, fields(kind = %descriptor.kind(), url = %descriptor.url()))]
pub fn scrape(config: &Config, tools: &Tools, descriptor: &mut RepositoryDescriptor, kinds: &[ResourceKind]) -> Scrape {
    let mut scrape = Scrape::default();
    let mut engine = Engine::new(tools, &config.mirror_root, config.budget())
        .with_fingerprint_prefix(config.archive.fingerprint_prefix);
    let retrieved = engine.retrieve(descriptor);
    scrape.notes = engine.notes().to_vec();
    match retrieved {
        Ok(changed) => scrape.changed = changed,
        Err(err) => {
            let explanation = format!("retrieving {}", descriptor.url());
            scrape.problem(Problem::error(Phase::Retrieve, (*err).to_string(), explanation));
            return scrape.finish();
        },
    }
    scrape.revision = descriptor.resolved_revision().map(str::to_string);

    let mirror = engine.mirror(descriptor);
    let freed = match mirror.reset_freed() {
        Ok(freed) => freed,
        Err(err) => {
            let explanation = format!("preparing {}", mirror.freed().display());
            scrape.problem(Problem::error(Phase::Retrieve, (*err).to_string(), explanation));
            return scrape.finish();
        },
    };
    let generator = config.metadata.generator.clone().map(|argv| {
        let generator = CommandGenerator::new(argv, config.supervisor())
            .with_timeout(Duration::from_secs(config.metadata.timeout_secs))
            .with_artifact_cap(config.metadata.artifact_cap);
        Box::new(generator) as Box<dyn Generator>
    });
    let metadata = MetadataScanner::new(Mode::Build, freed, generator);
    walk(config, descriptor, &mirror, metadata, kinds, &mut scrape);
    scrape.finish()
}

/// Catalog an already retrieved mirror again, reusing generated metadata.
#[instrument(skip_all, fields(kind = %descriptor.kind(), url = %descriptor.url()))]
pub fn rescan(config: &Config, descriptor: &RepositoryDescriptor, kinds: &[ResourceKind]) -> Scrape {
    let mut scrape = Scrape::default();
    let mirror = LocalMirror::new(&config.mirror_root, descriptor);
    if !mirror.repo().is_dir() {
        let explanation = format!("rescanning {}", descriptor.url());
        scrape.problem(Problem::error(Phase::Scan, "mirror has not been retrieved", explanation));
        return scrape.finish();
    }
    walk(config, descriptor, &mirror, MetadataScanner::new(Mode::Read, mirror.freed(), None), kinds, &mut scrape);
    scrape.finish()
}

fn walk(
    config: &Config,
    descriptor: &RepositoryDescriptor,
    mirror: &LocalMirror,
    metadata: MetadataScanner,
    kinds: &[ResourceKind],
    scrape: &mut Scrape,
) {
    let metadata = metadata
        .with_size_threshold(config.metadata.size_threshold)
        .with_artifact_cap(config.metadata.artifact_cap);
    let scanners = Union::new().with(ManifestScanner::new()).with(NameScanner::new()).with(metadata);
    let ignored = ignored(descriptor.kind()).iter().copied();
    let mut pipeline = Pipeline::new(mirror.repo(), ignored, kinds, scanners).with_repository(descriptor.url());

    while let Some(scanned) = pipeline.next() {
        match scanned {
            Ok(mut resource) => {
                for problem in std::mem::take(&mut resource.problems) {
                    scrape.problem(problem);
                }
                scrape.resources.push(resource);
            },
            Err(err) => {
                let phase = if err.is_metadata() { Phase::Metadata } else { Phase::Scan };
                let explanation = match pipeline.position() {
                    "" => format!("scanning {}", descriptor.url()),
                    position => format!("scanning {position} of {}", descriptor.url()),
                };
                scrape.problem(Problem::error(phase, (*err).to_string(), explanation));
            },
        }
    }
}

/// Version control directories that are never part of a resource.
fn ignored(kind: RepositoryKind) -> &'static [&'static str] {
    match kind {
        RepositoryKind::Git => &[".git"],
        RepositoryKind::Subversion => &[".svn"],
        RepositoryKind::Archive => &[],
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;
    use std::process::Command;
    use tempfile::TempDir;

    const KINDS: &[ResourceKind] = &[ResourceKind::Cookbook, ResourceKind::Workflow];

    fn installed(program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn git(dir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(["-c", "user.name=trawl", "-c", "user.email=trawl@example.com", "-c", "commit.gpgsign=false"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {args:?} failed: {}", String::from_utf8_lossy(&output.stderr));
    }

    /// A local git repository holding `files`, standing in for a remote.
    fn origin(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        git(dir.path(), &["init", "--quiet"]);
        git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
        for (path, contents) in files {
            let path = dir.path().join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        git(dir.path(), &["add", "--all"]);
        git(dir.path(), &["commit", "--quiet", "-m", "initial"]);
        dir
    }

    fn config(root: &Path) -> Config {
        let mut config = Config::default();
        config.mirror_root = root.to_path_buf();
        config.supervisor.poll_interval_ms = 50;
        config
    }

    fn descriptor(origin: &TempDir) -> RepositoryDescriptor {
        RepositoryDescriptor::new(RepositoryKind::Git, origin.path().display().to_string(), "")
    }

    #[test]
    fn single_resource_repository() {
        if !installed("git") {
            return;
        }
        let origin = origin(&[("metadata.json", r#"{"name": "solo", "version": "1.0.0"}"#)]);
        let root = TempDir::new().unwrap();
        let config = config(root.path());
        let tools = tools(&config);
        let mut descriptor = descriptor(&origin);

        let first = scrape(&config, &tools, &mut descriptor, KINDS);
        assert!(first.success, "{:?}", first.problems);
        assert!(first.changed);
        assert!(first.revision.is_some());
        assert_eq!(first.resources.len(), 1);
        let resource = &first.resources[0];
        assert_eq!(resource.position, ".");
        assert_eq!(resource.name(), Some("solo"));
        assert!(resource.manifest.contains_key("metadata.json"));
        assert!(!resource.manifest.keys().any(|key| key.starts_with(".git")));

        let second = scrape(&config, &tools, &mut descriptor, KINDS);
        assert!(second.success, "{:?}", second.problems);
        assert!(!second.changed);
        assert_eq!(second.resources, first.resources);
    }

    #[test]
    fn three_resources_with_generated_metadata() {
        if !installed("git") {
            return;
        }
        let origin = origin(&[
            ("cookbooks/apache/metadata.json", r#"{"name": "apache"}"#),
            ("cookbooks/nginx/metadata.rb", "name 'nginx'"),
            ("workflows/release/workflow.json", r#"{"name": "release"}"#),
        ]);
        let root = TempDir::new().unwrap();
        let mut config = config(root.path());
        let script = r#"printf '{"name": "generated", "position": "%s"}' "$TRAWL_POSITION" > "$TRAWL_ARTIFACT""#;
        config.metadata.generator = Some(vec!["sh".to_string(), "-c".to_string(), script.to_string()]);
        let tools = tools(&config);
        let mut descriptor = descriptor(&origin);

        let built = scrape(&config, &tools, &mut descriptor, KINDS);
        assert!(built.success, "{:?}", built.problems);
        let positions: Vec<_> = built.resources.iter().map(|r| r.position.as_str()).collect();
        assert_eq!(positions, vec!["cookbooks/apache", "cookbooks/nginx", "workflows/release"]);
        assert_eq!(built.resources[1].metadata["position"], "cookbooks/nginx");
        assert_eq!(built.resources[2].kind, ResourceKind::Workflow);

        // A second build pass starts from an empty artifact directory.
        let rebuilt = scrape(&config, &tools, &mut descriptor, KINDS);
        assert!(rebuilt.success, "{:?}", rebuilt.problems);

        // A read pass reuses the artifact without generating anything.
        config.metadata.generator = Some(vec!["false".to_string()]);
        let reread = rescan(&config, &descriptor, KINDS);
        assert!(reread.success, "{:?}", reread.problems);
        assert_eq!(reread.resources, built.resources);
    }

    #[test]
    fn metadata_failure_skips_only_that_resource() {
        if !installed("git") {
            return;
        }
        let origin = origin(&[
            ("a/metadata.rb", "name 'a'"),
            ("b/metadata.json", "{}"),
            ("b/caf\u{e9}.txt", "accent"),
        ]);
        let root = TempDir::new().unwrap();
        let config = config(root.path());
        let tools = tools(&config);
        let mut descriptor = descriptor(&origin);

        let scrape = scrape(&config, &tools, &mut descriptor, KINDS);
        assert!(!scrape.success);
        assert_eq!(scrape.resources.len(), 1);
        assert_eq!(scrape.resources[0].position, "b");
        assert_eq!(scrape.resources[0].name(), Some("b"));

        let errors: Vec<_> = scrape.problems.iter().filter(|p| p.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].phase, Phase::Metadata);
        assert_eq!(errors[0].explanation, format!("scanning a of {}", descriptor.url()));
        // The placeholder name and the odd file name are only warnings.
        let warnings: Vec<_> = scrape.problems.iter().filter(|p| !p.is_error()).map(|p| p.phase).collect();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.contains(&Phase::Scan));
        assert!(warnings.contains(&Phase::Metadata));
    }

    #[test]
    fn failed_retrieval_is_reported() {
        if !installed("git") {
            return;
        }
        let missing = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let config = config(root.path());
        let tools = tools(&config);
        let mut descriptor =
            RepositoryDescriptor::new(RepositoryKind::Git, missing.path().join("nope").display().to_string(), "");

        let scrape = scrape(&config, &tools, &mut descriptor, KINDS);
        assert!(!scrape.success);
        assert!(!scrape.changed);
        assert!(scrape.resources.is_empty());
        assert_eq!(scrape.problems.len(), 1);
        assert_eq!(scrape.problems[0].phase, Phase::Retrieve);
        assert!(scrape.problems[0].explanation.starts_with("retrieving "));
    }

    #[test]
    fn rescan_needs_a_mirror() {
        let root = TempDir::new().unwrap();
        let config = config(root.path());
        let descriptor = RepositoryDescriptor::new(RepositoryKind::Archive, "https://example.com/x.tar.gz", "");
        let scrape = rescan(&config, &descriptor, KINDS);
        assert!(!scrape.success);
        assert_eq!(scrape.problems[0].phase, Phase::Scan);
    }

    #[test]
    fn ignored_directories_follow_kind() {
        assert_eq!(ignored(RepositoryKind::Git), &[".git"]);
        assert_eq!(ignored(RepositoryKind::Subversion), &[".svn"]);
        assert!(ignored(RepositoryKind::Archive).is_empty());
    }
}
