//! Routes `log` records into the live DAP session as `output` events, so
//! adapter diagnostics land in the editor's debug console instead of a file
//! nobody looks at. Level filtering is delegated to an inner env_logger.

use std::fmt::Write as _;
use std::io::Write;
use std::sync::{Arc, Mutex};

use dap::events::{Event, OutputEventBody};
use dap::server::ServerOutput;
use dap::types::OutputEventCategory;
use log::LevelFilter;

pub struct DapLogger<W: Write> {
    inner: env_logger::Logger,
    output: Arc<Mutex<ServerOutput<W>>>,
}

impl<W: Write> DapLogger<W> {
    pub fn new(output: Arc<Mutex<ServerOutput<W>>>) -> Self {
        Self {
            inner: env_logger::Logger::from_default_env(),
            output,
        }
    }

    pub fn filter(&self) -> LevelFilter {
        self.inner.filter()
    }
}

impl<W: Write + Send> log::Log for DapLogger<W> {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut text = String::new();
        let _ = write!(text, "[{}] ", record.level());
        if let Some(module) = record.module_path() {
            let _ = write!(text, "{module} ");
        }
        let _ = writeln!(text, "{}", record.args());

        if let Ok(mut output) = self.output.lock() {
            let _ = output.send_event(Event::Output(OutputEventBody {
                category: Some(OutputEventCategory::Console),
                output: text,
                ..Default::default()
            }));
        }
    }

    fn flush(&self) {}
}
