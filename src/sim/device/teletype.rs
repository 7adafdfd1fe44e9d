//! Buffered console teletype.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::Unit;

fn resolve_lock<'a, T>(
    r: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    r.unwrap_or_else(PoisonError::into_inner)
}

/// A console-class teletype backed by in-memory byte buffers.
///
/// Input bytes pushed with [`push_input`] become readable words (low byte,
/// high byte zero); output words land in a buffer drained with
/// [`take_output`]. Clones share the same buffers, so a front end can keep
/// one clone as a handle while another is attached to the unit table.
///
/// The teletype accepts every command word and asserts no interrupt lines;
/// a front end that wants input interrupts can wrap it.
///
/// [`push_input`]: BufferedTeletype::push_input
/// [`take_output`]: BufferedTeletype::take_output
#[derive(Debug, Default, Clone)]
pub struct BufferedTeletype {
    input: Arc<Mutex<VecDeque<u8>>>,
    output: Arc<Mutex<Vec<u8>>>,
}

impl BufferedTeletype {
    /// Creates a teletype with empty buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes to the input buffer.
    pub fn push_input(&self, bytes: &[u8]) {
        resolve_lock(self.input.lock()).extend(bytes);
    }

    /// Whether any input is pending.
    pub fn has_input(&self) -> bool {
        !resolve_lock(self.input.lock()).is_empty()
    }

    /// Takes everything written so far, leaving the output buffer empty.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut resolve_lock(self.output.lock()))
    }
}

impl Unit for BufferedTeletype {
    fn command_ready(&mut self) -> bool {
        true
    }

    fn write_ready(&mut self) -> bool {
        true
    }

    fn read_ready(&mut self) -> bool {
        self.has_input()
    }

    fn command(&mut self, _word: i16) -> bool {
        true
    }

    fn write(&mut self, word: i16) -> bool {
        resolve_lock(self.output.lock()).push(word as u8);
        true
    }

    fn read(&mut self) -> Option<i16> {
        resolve_lock(self.input.lock()).pop_front().map(i16::from)
    }

    fn test(&mut self, _word: i16) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_buffers() {
        let handle = BufferedTeletype::new();
        let mut attached = handle.clone();

        handle.push_input(b"AB");
        assert!(attached.read_ready());
        assert_eq!(attached.read(), Some(0x41));
        assert_eq!(attached.read(), Some(0x42));
        assert_eq!(attached.read(), None);
        assert!(!attached.read_ready());

        assert!(attached.write(0x0D4A)); // low byte only
        assert_eq!(handle.take_output(), vec![0x4A]);
        assert!(handle.take_output().is_empty());
    }
}
