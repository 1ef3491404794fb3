use std::sync::Arc;

use super::checker::Checker;
use super::context::DiskContext;
use super::error::DiskError;
use super::reader::Reader;
use super::request::set_debug_timing;
use super::writer::Writer;

/// Reader, writer and checker of one torrent, sharing a [`DiskContext`].
pub struct DiskIo {
    ctx: DiskContext,
    reader: Arc<Reader>,
    writer: Arc<Writer>,
    checker: Arc<Checker>,
}

impl DiskIo {
    pub fn new(ctx: DiskContext) -> Self {
        if ctx.config.debug_timing {
            set_debug_timing(true);
        }

        let reader = Reader::new(ctx.clone());
        let writer = Writer::new(ctx.clone());
        let checker = Checker::new(ctx.clone(), Arc::clone(&reader));

        Self {
            ctx,
            reader,
            writer,
            checker,
        }
    }

    pub fn start(&self) -> Result<(), DiskError> {
        self.reader.start()?;
        self.writer.start()?;
        self.checker.start()?;
        Ok(())
    }

    /// Stops all components and waits for them to go quiet.
    ///
    /// The checker stops first so its outstanding reads still complete.
    pub async fn stop(&self) {
        self.checker.stop().await;
        self.writer.stop().await;
        self.reader.stop().await;
    }

    pub fn context(&self) -> &DiskContext {
        &self.ctx
    }

    pub fn reader(&self) -> &Arc<Reader> {
        &self.reader
    }

    pub fn writer(&self) -> &Arc<Writer> {
        &self.writer
    }

    pub fn checker(&self) -> &Arc<Checker> {
        &self.checker
    }
}
