//! Downstream stage the processor forwards every batch to.

use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;

use crate::model::Traces;

/// Next stage of the host pipeline.
///
/// An error returned here is the only error [`crate::VaultProcessor::process_batch`]
/// ever surfaces.
pub trait TracesConsumer: Send + Sync {
    fn consume_traces(&self, traces: Traces) -> anyhow::Result<()>;
}

impl<F> TracesConsumer for F
where
    F: Fn(Traces) -> anyhow::Result<()> + Send + Sync,
{
    fn consume_traces(&self, traces: Traces) -> anyhow::Result<()> {
        self(traces)
    }
}

/// Collects every batch in memory.
#[derive(Debug, Default)]
pub struct TracesSink {
    batches: Mutex<Vec<Traces>>,
}

impl TracesSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Traces>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn all_traces(&self) -> Vec<Traces> {
        self.lock().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.lock().len()
    }

    pub fn span_count(&self) -> usize {
        self.lock().iter().map(Traces::span_count).sum()
    }

    pub fn reset(&self) {
        self.lock().clear();
    }
}

impl TracesConsumer for TracesSink {
    fn consume_traces(&self, traces: Traces) -> anyhow::Result<()> {
        self.lock().push(traces);
        Ok(())
    }
}

/// Writes each batch as one JSON document per line.
#[derive(Debug)]
pub struct JsonLinesExporter<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesExporter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> TracesConsumer for JsonLinesExporter<W> {
    fn consume_traces(&self, traces: Traces) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *writer, &traces).context("Failed to serialize batch")?;
        writer.write_all(b"\n")?;
        writer.flush().context("Failed to flush batch output")?;
        Ok(())
    }
}
