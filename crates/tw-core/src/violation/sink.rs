use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tw_config::SinkUri;

use super::Violation;

/// Output destination for violation records.
pub trait ViolationSink: Send + Sync {
    fn send(&self, violation: &Violation) -> Result<()>;
}

impl<T: ViolationSink + ?Sized> ViolationSink for Arc<T> {
    fn send(&self, violation: &Violation) -> Result<()> {
        (**self).send(violation)
    }
}

// ---------------------------------------------------------------------------
// FileViolationSink
// ---------------------------------------------------------------------------

/// Appends violations as JSON Lines, flushing after every record.
pub struct FileViolationSink {
    writer: Mutex<BufWriter<File>>,
}

impl FileViolationSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl ViolationSink for FileViolationSink {
    fn send(&self, violation: &Violation) -> Result<()> {
        let json = serde_json::to_string(violation)?;
        let mut w = self.writer.lock().expect("violation sink lock poisoned");
        w.write_all(json.as_bytes())?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryViolationSink
// ---------------------------------------------------------------------------

/// Collects violations in process, for tests and embedding callers.
#[derive(Default)]
pub struct MemoryViolationSink {
    records: Mutex<Vec<Violation>>,
}

impl MemoryViolationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Violation> {
        self.records.lock().expect("violation sink lock poisoned").clone()
    }

    pub fn take(&self) -> Vec<Violation> {
        std::mem::take(&mut *self.records.lock().expect("violation sink lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("violation sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ViolationSink for MemoryViolationSink {
    fn send(&self, violation: &Violation) -> Result<()> {
        self.records
            .lock()
            .expect("violation sink lock poisoned")
            .push(violation.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FanOutSink
// ---------------------------------------------------------------------------

/// Sends every violation to all sinks. A failing sink does not stop the
/// others; the first error is returned.
pub struct FanOutSink {
    sinks: Vec<Box<dyn ViolationSink>>,
}

impl FanOutSink {
    pub fn new(sinks: Vec<Box<dyn ViolationSink>>) -> Self {
        Self { sinks }
    }
}

impl ViolationSink for FanOutSink {
    fn send(&self, violation: &Violation) -> Result<()> {
        let mut first_err: Option<anyhow::Error> = None;
        for sink in &self.sinks {
            if let Err(e) = sink.send(violation)
                && first_err.is_none()
            {
                first_err = Some(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// build_sinks
// ---------------------------------------------------------------------------

/// Sinks built from configuration. Memory sinks stay reachable by name.
pub struct SinkSet {
    pub sink: Arc<dyn ViolationSink>,
    pub memory: BTreeMap<String, Arc<MemoryViolationSink>>,
}

impl SinkSet {
    pub fn memory(&self, name: &str) -> Option<&Arc<MemoryViolationSink>> {
        self.memory.get(name)
    }
}

/// Relative file paths resolve against `base_dir`. Two URIs naming the same
/// memory sink share it.
pub fn build_sinks(uris: &[SinkUri], base_dir: &Path) -> Result<SinkSet> {
    let mut sinks: Vec<Box<dyn ViolationSink>> = Vec::with_capacity(uris.len());
    let mut memory: BTreeMap<String, Arc<MemoryViolationSink>> = BTreeMap::new();
    for uri in uris {
        match uri {
            SinkUri::File(path) => {
                let path = base_dir.join(path);
                sinks.push(Box::new(FileViolationSink::open(&path)?));
            }
            SinkUri::Memory(name) => {
                let sink = memory.entry(name.clone()).or_default();
                sinks.push(Box::new(Arc::clone(sink)));
            }
        }
    }
    Ok(SinkSet {
        sink: Arc::new(FanOutSink::new(sinks)),
        memory,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::Severity;
    use crate::violation::Origin;

    fn sample(trace_id: &str) -> Violation {
        Violation {
            violation_id: "0123456789abcdef".into(),
            rule_id: "r".into(),
            rule_revision: 1,
            tenant_id: "acme".into(),
            trace_id: trace_id.into(),
            severity: Severity::Medium,
            span_ids: vec!["s1".into()],
            bindings: vec![],
            occurred_at_nanos: 0,
            occurred_at: "1970-01-01T00:00:00.000000000Z".into(),
            origin: Origin::Live,
            late: false,
        }
    }

    struct CountingSink(AtomicUsize);

    impl ViolationSink for CountingSink {
        fn send(&self, _v: &Violation) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailSink;

    impl ViolationSink for FailSink {
        fn send(&self, _v: &Violation) -> Result<()> {
            anyhow::bail!("intentional failure");
        }
    }

    #[test]
    fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/violations.jsonl");
        {
            let sink = FileViolationSink::open(&path).unwrap();
            sink.send(&sample("t1")).unwrap();
            sink.send(&sample("t2")).unwrap();
        }
        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: Violation = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.trace_id, "t2");
    }

    #[test]
    fn fanout_continues_after_failure() {
        let counter = Arc::new(CountingSink(AtomicUsize::new(0)));
        let sink = FanOutSink::new(vec![
            Box::new(FailSink),
            Box::new(Arc::clone(&counter)),
        ]);
        assert!(sink.send(&sample("t1")).is_err());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(FanOutSink::new(vec![]).send(&sample("t1")).is_ok());
    }

    #[test]
    fn build_sinks_from_uris() {
        let dir = tempfile::tempdir().unwrap();
        let uris = vec![
            SinkUri::File(PathBuf::from("out/v.jsonl")),
            SinkUri::Memory("audit".into()),
            SinkUri::Memory("audit".into()),
        ];
        let set = build_sinks(&uris, dir.path()).unwrap();
        set.sink.send(&sample("t1")).unwrap();

        let audit = set.memory("audit").unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit.take().len(), 2);
        assert!(audit.is_empty());
        let written = fs::read_to_string(dir.path().join("out/v.jsonl")).unwrap();
        assert_eq!(written.lines().count(), 1);
    }
}
