use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};

/// Process-wide logger slot.
///
/// `log::set_boxed_logger` can only ever be called once, but the two halves of
/// the bridge want different sinks at different times: the adapter starts on
/// stderr and re-routes records into the DAP session once one exists, the
/// interface library must stay silent until the host enables it. The slot is
/// installed lazily and the active sink swapped underneath it.
#[derive(Clone)]
pub struct LoggerSlot {
    sink: Arc<RwLock<Option<Box<dyn Log>>>>,
}

pub static LOGGER: Lazy<LoggerSlot> = Lazy::new(|| {
    let slot = LoggerSlot {
        sink: Arc::new(RwLock::new(None)),
    };

    log::set_boxed_logger(Box::new(slot.clone())).expect("first and only install");
    log::set_max_level(LevelFilter::Debug);

    slot
});

impl LoggerSlot {
    /// Replace the active sink and the global maximum level.
    pub fn install<L: Log + 'static>(&self, sink: L, level: LevelFilter) {
        *self.sink.write().unwrap() = Some(Box::new(sink));
        log::set_max_level(level);
    }
}

impl Log for LoggerSlot {
    fn enabled(&self, metadata: &Metadata) -> bool {
        match &*self.sink.read().unwrap() {
            Some(sink) => sink.enabled(metadata),
            None => false,
        }
    }

    fn log(&self, record: &Record) {
        if let Some(sink) = &*self.sink.read().unwrap() {
            sink.log(record);
        }
    }

    fn flush(&self) {
        if let Some(sink) = &*self.sink.read().unwrap() {
            sink.flush();
        }
    }
}
