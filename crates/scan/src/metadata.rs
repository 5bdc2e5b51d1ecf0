//! Resource metadata, read from a descriptor or generated from source.
//!
//! A resource that ships its machine-readable descriptor is simply read.
//! Otherwise the descriptor has to be generated by an external and
//! untrusted [`Generator`], which only ever sees copies of the resource's
//! small files in a throwaway sandbox and writes its result to the mirror's
//! `freed` directory. A later [`Mode::Read`] pass reuses that artifact
//! without generating anything.

use crate::error::{ErrorKind, Result};
use crate::report::{Phase, Problem};
use crate::resource::{ROOT_POSITION, Resource};
use crate::visitor::{Content, Scanner};
use exn::{OptionExt, ResultExt};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use trawl_process::{Budget, Outcome, Supervisor};

/// Files at or above this size are not handed to the generator.
pub const DEFAULT_SIZE_THRESHOLD: u64 = 1024 * 1024;
/// Largest descriptor that will be read back.
pub const DEFAULT_ARTIFACT_CAP: u64 = 1024 * 1024;
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(300);
/// File name of generated descriptors under the `freed` directory.
pub const ARTIFACT_NAME: &str = "metadata.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Generate missing descriptors.
    Build,
    /// Only reuse descriptors generated by an earlier build pass.
    Read,
}

/// The external step that turns a resource's source into a descriptor.
pub trait Generator {
    /// Write a descriptor for the resource at `position` to `artifact`,
    /// working from the sandboxed copy in `workdir`.
    fn generate(&self, workdir: &Path, position: &str, artifact: &Path) -> Result<()>;
}

impl<F> Generator for F
where
    F: Fn(&Path, &str, &Path) -> Result<()>,
{
    fn generate(&self, workdir: &Path, position: &str, artifact: &Path) -> Result<()> {
        self(workdir, position, artifact)
    }
}

/// Runs a configured command in the sandbox.
///
/// The command learns what to do from `TRAWL_POSITION` and `TRAWL_ARTIFACT`
/// and is supervised: its output directory is capped at the artifact cap
/// and it gets a fixed amount of time.
pub struct CommandGenerator {
    argv: Vec<String>,
    supervisor: Supervisor,
    timeout: Duration,
    artifact_cap: u64,
}

impl CommandGenerator {
    pub fn new(argv: Vec<String>, supervisor: Supervisor) -> Self {
        Self { argv, supervisor, timeout: DEFAULT_GENERATION_TIMEOUT, artifact_cap: DEFAULT_ARTIFACT_CAP }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_artifact_cap(mut self, artifact_cap: u64) -> Self {
        self.artifact_cap = artifact_cap;
        self
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip(self), fields(program = self.argv.first().map(String::as_str)))]
    fn generate(&self, workdir: &Path, position: &str, artifact: &Path) -> Result<()> {
        let (program, args) =
            self.argv.split_first().ok_or_raise(|| ErrorKind::Generation("no generator command".to_string()))?;
        let watched = artifact
            .parent()
            .ok_or_raise(|| ErrorKind::Generation(format!("artifact {} has no parent", artifact.display())))?;
        std::fs::create_dir_all(watched).or_raise(|| ErrorKind::Io)?;

        let mut command = Command::new(program);
        command.args(args).current_dir(workdir).env("TRAWL_POSITION", position).env("TRAWL_ARTIFACT", artifact);
        let budget = Budget::unlimited().with_max_bytes(self.artifact_cap).with_max_duration(self.timeout);
        let run = self.supervisor.supervise(command, watched, &budget).map_err(|e| {
            let message = format!("{program}: {}", *e);
            e.raise(ErrorKind::Generation(message))
        })?;
        match run.outcome {
            Outcome::Success if run.exit_code == 0 => {},
            Outcome::Success => {
                exn::bail!(ErrorKind::Generation(format!(
                    "{program} exited with code {}: {}",
                    run.exit_code,
                    run.output.to_string_lossy().trim()
                )));
            },
            Outcome::Timeout => {
                exn::bail!(ErrorKind::Generation(format!("{program} ran out of time")));
            },
            Outcome::SizeExceeded => {
                exn::bail!(ErrorKind::Generation(format!("{program} wrote more than {} bytes", self.artifact_cap)));
            },
        }
        if !artifact.is_file() {
            exn::bail!(ErrorKind::Generation(format!("{program} wrote no artifact")));
        }
        Ok(())
    }
}

/// Fills in [`Resource::metadata`].
pub struct MetadataScanner {
    mode: Mode,
    generator: Option<Box<dyn Generator>>,
    freed: PathBuf,
    size_threshold: u64,
    artifact_cap: u64,
    small: Vec<PathBuf>,
    oversized: Vec<(PathBuf, u64)>,
}

impl MetadataScanner {
    /// A scanner that generates missing descriptors into `freed`.
    pub fn build(freed: impl Into<PathBuf>, generator: impl Generator + 'static) -> Self {
        Self::new(Mode::Build, freed, Some(Box::new(generator)))
    }

    /// A scanner that only reads descriptors, generated or not.
    pub fn read(freed: impl Into<PathBuf>) -> Self {
        Self::new(Mode::Read, freed, None)
    }

    /// Without a generator, a build pass fails any resource that needs one.
    pub fn new(mode: Mode, freed: impl Into<PathBuf>, generator: Option<Box<dyn Generator>>) -> Self {
        Self {
            mode,
            generator,
            freed: freed.into(),
            size_threshold: DEFAULT_SIZE_THRESHOLD,
            artifact_cap: DEFAULT_ARTIFACT_CAP,
            small: Vec::new(),
            oversized: Vec::new(),
        }
    }

    pub fn with_size_threshold(mut self, size_threshold: u64) -> Self {
        self.size_threshold = size_threshold;
        self
    }

    pub fn with_artifact_cap(mut self, artifact_cap: u64) -> Self {
        self.artifact_cap = artifact_cap;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Where the generated descriptor of the resource at `position` lives.
    pub fn artifact_path(&self, position: &str) -> PathBuf {
        if position == ROOT_POSITION {
            self.freed.join(ARTIFACT_NAME)
        } else {
            self.freed.join(position).join(ARTIFACT_NAME)
        }
    }

    fn generate(&self, resource: &mut Resource, artifact: &Path) -> Result<()> {
        if artifact.exists() {
            exn::bail!(ErrorKind::ArtifactExists(artifact.to_path_buf()));
        }
        let source = resource.kind.generation_source().ok_or_raise(|| {
            ErrorKind::Generation(format!(
                "{} has no {} and nothing to generate it from",
                resource.position,
                resource.kind.descriptor()
            ))
        })?;
        if let Some((path, size)) = self.oversized.iter().find(|(path, _)| path == Path::new(source)) {
            exn::bail!(ErrorKind::OversizedSource { path: path.clone(), size: *size, limit: self.size_threshold });
        }
        for (path, size) in &self.oversized {
            warn!(path = %path.display(), size, "omitting oversized file from metadata generation");
            resource.problems.push(Problem::warning(
                Phase::Metadata,
                format!("{} is {size} bytes, over the {} byte limit", path.display(), self.size_threshold),
                format!("omitted from metadata generation for {}", resource.position),
            ));
        }
        let generator =
            self.generator.as_ref().ok_or_raise(|| ErrorKind::Generation("no generator configured".to_string()))?;

        let sandbox = tempfile::Builder::new().prefix("trawl-metadata-").tempdir().or_raise(|| ErrorKind::Io)?;
        let root = resource.path();
        for path in &self.small {
            let destination = sandbox.path().join(path);
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
            }
            std::fs::copy(root.join(path), &destination).or_raise(|| ErrorKind::Io)?;
        }
        debug!(files = self.small.len(), sandbox = %sandbox.path().display(), "populated metadata sandbox");
        if let Some(parent) = artifact.parent() {
            std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
        }
        generator.generate(sandbox.path(), &resource.position, artifact)?;
        info!(position = %resource.position, artifact = %artifact.display(), "generated metadata");
        Ok(())
    }
}

impl Scanner for MetadataScanner {
    fn begin(&mut self, _resource: &mut Resource) -> Result<()> {
        self.small.clear();
        self.oversized.clear();
        Ok(())
    }

    fn notice(&mut self, _resource: &mut Resource, path: &Path, content: &mut Content) -> Result<()> {
        if self.mode == Mode::Read {
            return Ok(());
        }
        let size = content.size()?;
        if size >= self.size_threshold {
            self.oversized.push((path.to_path_buf(), size));
        } else {
            self.small.push(path.to_path_buf());
        }
        Ok(())
    }

    fn end(&mut self, resource: &mut Resource) -> Result<()> {
        let descriptor = resource.path().join(resource.kind.descriptor());
        let metadata = if descriptor.is_file() {
            read_descriptor(&descriptor, self.artifact_cap)?
        } else {
            let artifact = self.artifact_path(&resource.position);
            if self.mode == Mode::Build {
                self.generate(resource, &artifact)?;
            } else if !artifact.is_file() {
                exn::bail!(ErrorKind::ArtifactMissing(artifact));
            }
            read_descriptor(&artifact, self.artifact_cap)?
        };
        resource.metadata = metadata;

        if resource.name().is_none() {
            let placeholder = resource.directory_name();
            resource.problems.push(Problem::warning(
                Phase::Metadata,
                "metadata does not define a name",
                format!("using {placeholder:?} for {}", resource.position),
            ));
            resource.metadata.insert("name".to_string(), Value::String(placeholder));
        }
        Ok(())
    }
}

fn read_descriptor(path: &Path, cap: u64) -> Result<Map<String, Value>> {
    let size = std::fs::metadata(path).or_raise(|| ErrorKind::Io)?.len();
    if size > cap {
        exn::bail!(ErrorKind::ArtifactTooLarge { path: path.to_path_buf(), size, limit: cap });
    }
    let bytes = std::fs::read(path).or_raise(|| ErrorKind::Io)?;
    serde_json::from_slice(&bytes).or_raise(|| ErrorKind::InvalidDescriptor(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Severity;
    use crate::resource::ResourceKind;
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        repo: PathBuf,
        freed: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let repo = dir.path().join("repo");
            let freed = dir.path().join("freed");
            std::fs::create_dir_all(&repo).unwrap();
            std::fs::create_dir_all(&freed).unwrap();
            Self { _dir: dir, repo, freed }
        }

        fn write(&self, path: &str, contents: &[u8]) {
            let path = self.repo.join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }

        /// Run one pass over the files at the resource root `position`.
        fn run(&self, scanner: &mut MetadataScanner, position: &str, files: &[&str]) -> Result<Resource> {
            let mut resource = Resource::new(ResourceKind::Cookbook, "test", position, &self.repo);
            scanner.begin(&mut resource)?;
            for file in files {
                let mut content = Content::new(resource.path().join(file));
                scanner.notice(&mut resource, Path::new(file), &mut content)?;
            }
            scanner.end(&mut resource)?;
            Ok(resource)
        }
    }

    /// Writes `{"name": <position>, "files": [...]}` listing the sandbox contents.
    fn listing_generator(calls: Rc<Cell<usize>>) -> impl Generator {
        move |workdir: &Path, position: &str, artifact: &Path| -> Result<()> {
            calls.set(calls.get() + 1);
            let mut files: Vec<String> = std::fs::read_dir(workdir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            files.sort();
            let json = serde_json::json!({ "name": position, "files": files });
            std::fs::write(artifact, json.to_string()).unwrap();
            Ok(())
        }
    }

    #[test]
    fn descriptor_is_preferred() {
        let fixture = Fixture::new();
        fixture.write("metadata.json", br#"{"name": "apache", "version": "1.0.0"}"#);
        fixture.write("metadata.rb", b"name 'ignored'");
        let calls = Rc::new(Cell::new(0));
        let mut scanner = MetadataScanner::build(&fixture.freed, listing_generator(calls.clone()));
        let resource = fixture.run(&mut scanner, ".", &["metadata.json", "metadata.rb"]).unwrap();
        assert_eq!(resource.name(), Some("apache"));
        assert_eq!(resource.metadata["version"], "1.0.0");
        assert_eq!(calls.get(), 0);
        assert!(resource.problems.is_empty());
    }

    #[test]
    fn generated_then_reused() {
        let fixture = Fixture::new();
        fixture.write("cookbooks/nginx/metadata.rb", b"name 'nginx'");
        fixture.write("cookbooks/nginx/big.bin", &[0u8; 64]);
        let calls = Rc::new(Cell::new(0));
        let mut build =
            MetadataScanner::build(&fixture.freed, listing_generator(calls.clone())).with_size_threshold(32);
        let resource = fixture.run(&mut build, "cookbooks/nginx", &["big.bin", "metadata.rb"]).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(resource.name(), Some("cookbooks/nginx"));
        assert_eq!(resource.metadata["files"], serde_json::json!(["metadata.rb"]));
        assert!(fixture.freed.join("cookbooks/nginx/metadata.json").is_file());

        // The oversized file was left out, with a warning.
        assert_eq!(resource.problems.len(), 1);
        assert_eq!(resource.problems[0].phase, Phase::Metadata);
        assert_eq!(resource.problems[0].severity, Severity::Warning);

        let mut read = MetadataScanner::read(&fixture.freed);
        let reread = fixture.run(&mut read, "cookbooks/nginx", &["big.bin", "metadata.rb"]).unwrap();
        assert_eq!(reread.metadata, resource.metadata);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn existing_artifact_is_never_overwritten() {
        let fixture = Fixture::new();
        fixture.write("metadata.rb", b"name 'x'");
        std::fs::write(fixture.freed.join(ARTIFACT_NAME), b"{}").unwrap();
        let calls = Rc::new(Cell::new(0));
        let mut scanner = MetadataScanner::build(&fixture.freed, listing_generator(calls.clone()));
        let err = fixture.run(&mut scanner, ".", &["metadata.rb"]).unwrap_err();
        assert_eq!(*err, ErrorKind::ArtifactExists(fixture.freed.join(ARTIFACT_NAME)));
        assert_eq!(calls.get(), 0);
        assert_eq!(std::fs::read(fixture.freed.join(ARTIFACT_NAME)).unwrap(), b"{}");
    }

    #[test]
    fn oversized_source_is_fatal() {
        let fixture = Fixture::new();
        fixture.write("metadata.rb", &[b'#'; 64]);
        let calls = Rc::new(Cell::new(0));
        let mut scanner =
            MetadataScanner::build(&fixture.freed, listing_generator(calls.clone())).with_size_threshold(64);
        let err = fixture.run(&mut scanner, ".", &["metadata.rb"]).unwrap_err();
        assert!(matches!(&*err, ErrorKind::OversizedSource { size: 64, limit: 64, .. }));
        assert!(err.is_metadata());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn read_mode_requires_artifact() {
        let fixture = Fixture::new();
        fixture.write("metadata.rb", b"name 'x'");
        let mut scanner = MetadataScanner::read(&fixture.freed);
        let err = fixture.run(&mut scanner, ".", &["metadata.rb"]).unwrap_err();
        assert_eq!(*err, ErrorKind::ArtifactMissing(fixture.freed.join(ARTIFACT_NAME)));
    }

    #[test]
    fn build_without_generator_fails_only_when_needed() {
        let fixture = Fixture::new();
        fixture.write("a/metadata.json", br#"{"name": "a"}"#);
        fixture.write("b/metadata.rb", b"name 'b'");
        let mut scanner = MetadataScanner::new(Mode::Build, &fixture.freed, None);
        assert_eq!(fixture.run(&mut scanner, "a", &["metadata.json"]).unwrap().name(), Some("a"));
        let err = fixture.run(&mut scanner, "b", &["metadata.rb"]).unwrap_err();
        assert_eq!(*err, ErrorKind::Generation("no generator configured".to_string()));
    }

    #[test]
    fn missing_name_gets_placeholder() {
        let fixture = Fixture::new();
        fixture.write("cookbooks/redis/metadata.json", br#"{"version": "2.0.0"}"#);
        let mut scanner = MetadataScanner::read(&fixture.freed);
        let resource = fixture.run(&mut scanner, "cookbooks/redis", &["metadata.json"]).unwrap();
        assert_eq!(resource.name(), Some("redis"));
        assert_eq!(resource.problems.len(), 1);
        assert_eq!(resource.problems[0].error, "metadata does not define a name");
    }

    #[test]
    fn descriptor_over_cap_is_rejected() {
        let fixture = Fixture::new();
        fixture.write("metadata.json", br#"{"name": "a-rather-long-name"}"#);
        let mut scanner = MetadataScanner::read(&fixture.freed).with_artifact_cap(8);
        let err = fixture.run(&mut scanner, ".", &["metadata.json"]).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ArtifactTooLarge { limit: 8, .. }));
    }

    #[test]
    fn descriptor_must_be_an_object() {
        let fixture = Fixture::new();
        fixture.write("metadata.json", b"[1, 2, 3]");
        let mut scanner = MetadataScanner::read(&fixture.freed);
        let err = fixture.run(&mut scanner, ".", &["metadata.json"]).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidDescriptor(fixture.repo.join("metadata.json")));
    }

    #[cfg(unix)]
    mod command {
        use super::*;

        fn generator(script: &str) -> CommandGenerator {
            let argv = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
            CommandGenerator::new(argv, Supervisor::new().with_poll_interval(Duration::from_millis(20)))
        }

        #[test]
        fn command_sees_position_and_artifact() {
            let fixture = Fixture::new();
            fixture.write("metadata.rb", b"name 'x'");
            let script = r#"test -f metadata.rb && printf '{"name": "%s"}' "$TRAWL_POSITION" > "$TRAWL_ARTIFACT""#;
            let mut scanner = MetadataScanner::build(&fixture.freed, generator(script));
            let resource = fixture.run(&mut scanner, ".", &["metadata.rb"]).unwrap();
            assert_eq!(resource.name(), Some("."));
        }

        #[test]
        fn command_failure_is_generation_error() {
            let fixture = Fixture::new();
            fixture.write("metadata.rb", b"name 'x'");
            let mut scanner = MetadataScanner::build(&fixture.freed, generator("echo nope >&2; exit 3"));
            let err = fixture.run(&mut scanner, ".", &["metadata.rb"]).unwrap_err();
            match &*err {
                ErrorKind::Generation(message) => {
                    assert!(message.contains("code 3"));
                    assert!(message.contains("nope"));
                },
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn command_without_artifact_is_generation_error() {
            let fixture = Fixture::new();
            fixture.write("metadata.rb", b"name 'x'");
            let mut scanner = MetadataScanner::build(&fixture.freed, generator("true"));
            let err = fixture.run(&mut scanner, ".", &["metadata.rb"]).unwrap_err();
            assert_eq!(*err, ErrorKind::Generation("sh wrote no artifact".to_string()));
        }

        #[test]
        fn command_is_timed() {
            let fixture = Fixture::new();
            fixture.write("metadata.rb", b"name 'x'");
            let generator = generator("sleep 5").with_timeout(Duration::from_millis(200));
            let mut scanner = MetadataScanner::build(&fixture.freed, generator);
            let err = fixture.run(&mut scanner, ".", &["metadata.rb"]).unwrap_err();
            assert_eq!(*err, ErrorKind::Generation("sh ran out of time".to_string()));
        }
    }
}
