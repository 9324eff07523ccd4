//! Logger provider and loggers.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use crate::provider::Pipeline;
use crate::record::{InstrumentationScope, LogEntry, Severity};
use crate::value::{AttributeValue, Attributes};

#[derive(Debug, Clone)]
pub struct LoggerProvider {
    pipeline: Arc<Pipeline>,
}

impl LoggerProvider {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn logger(&self, name: impl Into<Cow<'static, str>>) -> Logger {
        Logger {
            scope: InstrumentationScope::new(name.into().into_owned()),
            pipeline: Arc::clone(&self.pipeline),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn force_flush(&self, timeout: Duration) -> bool {
        self.pipeline.force_flush(timeout).await
    }

    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.pipeline.shutdown(timeout).await
    }
}

#[derive(Debug, Clone)]
pub struct Logger {
    scope: InstrumentationScope,
    pipeline: Arc<Pipeline>,
}

impl Logger {
    /// Emit `entry`, stamping it with this logger's scope.
    pub fn emit(&self, mut entry: LogEntry) {
        entry.scope = self.scope.clone();
        self.pipeline.emit(entry.into());
    }

    pub fn log(&self, severity: Severity, body: impl Into<AttributeValue>, attributes: Attributes) {
        self.emit(
            LogEntry::builder(body)
                .severity(severity)
                .attributes(attributes)
                .build(),
        );
    }

    pub fn info(&self, body: impl Into<AttributeValue>, attributes: Attributes) {
        self.log(Severity::Info, body, attributes);
    }

    pub fn warn(&self, body: impl Into<AttributeValue>, attributes: Attributes) {
        self.log(Severity::Warn, body, attributes);
    }

    pub fn error(&self, body: impl Into<AttributeValue>, attributes: Attributes) {
        self.log(Severity::Error, body, attributes);
    }
}
