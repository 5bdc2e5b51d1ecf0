use std::io::Read;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

const CHUNK_SIZE: usize = 8192;

/// Output captured from a supervised process (stdout and stderr combined,
/// in the order the chunks arrived).
///
/// When the supervisor was configured with an output cap, only the first
/// `cap` bytes are retained and everything after is counted in
/// [`dropped`](Self::dropped) instead.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    bytes: Vec<u8>,
    dropped: u64,
}

impl CapturedOutput {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes discarded because the cap was reached.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    /// Lossy UTF-8 rendering, with a marker when output was discarded.
    pub fn to_string_lossy(&self) -> String {
        let text = String::from_utf8_lossy(&self.bytes);
        match self.dropped {
            0 => text.into_owned(),
            n => format!("{text}... [{n} bytes discarded]"),
        }
    }
}

/// Buffer shared between the reader threads and the supervisor.
#[derive(Clone)]
pub(crate) struct SharedOutput {
    inner: Arc<Mutex<CapturedOutput>>,
    cap: Option<usize>,
}

impl SharedOutput {
    pub(crate) fn new(cap: Option<usize>) -> Self {
        Self { inner: Arc::new(Mutex::new(CapturedOutput::default())), cap }
    }

    fn append(&self, chunk: &[u8]) {
        // A panicking reader thread cannot leave the buffer half-written in a
        // way that matters to us; keep whatever made it in.
        let mut output = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let keep = match self.cap {
            Some(cap) => chunk.len().min(cap.saturating_sub(output.bytes.len())),
            None => chunk.len(),
        };
        output.bytes.extend_from_slice(&chunk[..keep]);
        output.dropped = output.dropped.saturating_add((chunk.len() - keep) as u64);
    }

    pub(crate) fn snapshot(&self) -> CapturedOutput {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drain `stream` on a background thread until EOF, notifying `done`
    /// when finished. Read errors end the drain silently: the stream belongs
    /// to a process that is exiting or being killed.
    pub(crate) fn drain<R: Read + Send + 'static>(&self, mut stream: R, done: Sender<()>) {
        let shared = self.clone();
        std::thread::spawn(move || {
            let mut buffer = [0u8; CHUNK_SIZE];
            loop {
                match stream.read(&mut buffer) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => shared.append(&buffer[..n]),
                }
            }
            let _ = done.send(());
        });
    }
}
