// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::tracker::{EntityManager, Track};
use crate::{SharedWriter, Tag, Writer};

/// A simple text logger to output messages to a Writer.
pub struct TextTracker {
    entity_manager: EntityManager,

    /// Writer to which all _log_ events will be written.
    writer: SharedWriter,
}

impl TextTracker {
    /// Create a new [`TextTracker`] with an [`EntityManager`].
    pub fn new(entity_manager: EntityManager, writer: Writer) -> Self {
        Self {
            entity_manager,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    fn write_line(&self, line: std::fmt::Arguments) {
        // Tracking output is best-effort: a failed write must not stop the
        // simulation.
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}: {line}", self.entity_manager.time());
        }
    }
}

/// Implementation for each [`Track`] event
impl Track for TextTracker {
    fn unique_tag(&self) -> Tag {
        self.entity_manager.unique_tag()
    }

    fn is_entity_enabled(&self, tag: Tag, level: log::Level) -> bool {
        self.entity_manager.is_enabled(tag, level)
    }

    fn add_entity(&self, tag: Tag, entity_name: &str) {
        self.entity_manager.add_entity(tag, entity_name);
    }

    fn enter(&self, tag: Tag, object: Tag) {
        self.write_line(format_args!("{tag}: enter {object}"));
    }

    fn exit(&self, tag: Tag, object: Tag) {
        self.write_line(format_args!("{tag}: exit {object}"));
    }

    fn create(&self, created_by: Tag, tag: Tag, modeled_bits: usize, kind: &str) {
        self.write_line(format_args!(
            "{created_by}: created {tag}, {kind}, {modeled_bits} bits"
        ));
    }

    fn destroy(&self, destroyed_by: Tag, tag: Tag) {
        self.write_line(format_args!("{destroyed_by}: destroyed {tag}"));
    }

    fn log(&self, tag: Tag, level: log::Level, msg: std::fmt::Arguments) {
        self.write_line(format_args!("{tag}:{level}: {msg}"));
    }

    fn time(&self, _set_by: Tag, time: u64) {
        self.entity_manager.set_time(time);
    }

    fn shutdown(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}
