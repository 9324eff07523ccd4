//! Mirrors records to stdout, one JSON object per line.

use async_trait::async_trait;

use super::{ExportResponse, ExportResult, Exporter};
use crate::dump::{to_plain, DumpSink};
use crate::error::ExportError;
use crate::record::{Record, Signal};

#[derive(Debug, Clone)]
pub struct ConsoleExporter {
    signal: Signal,
    sink: DumpSink,
}

impl ConsoleExporter {
    pub fn stdout(signal: Signal) -> Self {
        Self::new(signal, DumpSink::stdout())
    }

    pub fn new(signal: Signal, sink: DumpSink) -> Self {
        Self { signal, sink }
    }
}

#[async_trait]
impl Exporter for ConsoleExporter {
    fn describe(&self) -> String {
        format!("console {} exporter", self.signal)
    }

    async fn export(&self, batch: &[Record]) -> ExportResult {
        let mut text = String::new();
        for record in batch {
            let line = serde_json::to_string(&to_plain(record))
                .map_err(|e| ExportError::Encode(e.to_string()))?;
            text.push_str(&line);
            text.push('\n');
        }
        self.sink.write_block(&text);
        Ok(ExportResponse::accepted(batch.len()))
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::TRANSPORT_MARKER;
    use crate::record::LogEntry;

    #[tokio::test]
    async fn writes_one_line_per_record() {
        let (sink, buf) = DumpSink::buffer();
        let exporter = ConsoleExporter::new(Signal::Logs, sink);
        let batch: Vec<Record> = (1..=2)
            .map(|i| LogEntry::builder(format!("line {i}")).build().into())
            .collect();

        let resp = exporter.export(&batch).await.unwrap();

        assert_eq!(resp.records, 2);
        let out = buf.contents();
        assert_eq!(out.lines().count(), 2);
        assert!(out.lines().next().unwrap().contains("\"body\":\"line 1\""));
    }

    #[test]
    fn is_not_an_otlp_exporter() {
        let exporter = ConsoleExporter::stdout(Signal::Traces);
        assert!(!exporter.describe().contains(TRANSPORT_MARKER));
    }
}
