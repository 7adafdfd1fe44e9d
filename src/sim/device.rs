//! External units connected to the simulator.
//!
//! The core types here are:
//! - [`Unit`]: the capability contract a peripheral must satisfy.
//! - [`UnitTable`]: the 64-slot table of attached units, addressed by the
//!   unit number encoded in I/O instructions.
//!
//! This module also provides some units:
//! - [`NullUnit`]: never ready, never interrupts.
//! - [`InterruptLine`]: asserts interrupt request lines from a function.
//! - [`BufferedTeletype`]: a console-class unit backed by byte buffers.
//!
//! Concrete transports (a real terminal, a network-attached device proxy)
//! live outside this crate; they plug in by implementing [`Unit`], not by
//! the simulator branching on device kinds. [`Destination`] covers the
//! attach-string convention such front ends share.

mod teletype;

pub use teletype::BufferedTeletype;

/// Number of addressable unit slots.
pub const UNITS: usize = 64;

/// The unit number conventionally occupied by the console teletype.
pub const CONSOLE_UNIT: u8 = 1;

/// An external unit, driven by the I/O instructions (CEU/TEU, AOP/AIP,
/// MOP/MIP) and polled for interrupt requests once per instruction.
///
/// Readiness predicates and transactions are split so the simulator can
/// implement skip mode (probe once) and wait mode (poll until ready) on
/// top of the same transaction calls. A transaction may still fail after
/// readiness was observed; the `bool`/[`Option`] results report that, and
/// failure is a normal outcome, never an error.
pub trait Unit: Send + 'static {
    /// Whether the unit would accept a command word right now.
    fn command_ready(&mut self) -> bool;

    /// Whether the unit would accept an output word right now.
    fn write_ready(&mut self) -> bool;

    /// Whether the unit has an input word available right now.
    fn read_ready(&mut self) -> bool;

    /// Sends a command word to the unit.
    fn command(&mut self, word: i16) -> bool;

    /// Sends an output word to the unit.
    fn write(&mut self, word: i16) -> bool;

    /// Takes an input word from the unit.
    fn read(&mut self) -> Option<i16>;

    /// Tests the unit with a test word (TEU); the response drives a skip.
    fn test(&mut self, word: i16) -> bool;

    /// Interrupt request lines, one 12-bit mask per priority group.
    ///
    /// Called once per instruction cycle; any set bits are folded into the
    /// interrupt controller's request masks. Real hardware would assert
    /// these lines asynchronously, but polling at the instruction boundary
    /// is where the processor would sample them anyway.
    fn interrupts(&mut self) -> [u16; 8] {
        [0; 8]
    }

    /// Tells the unit to release any blocked callers and shut down.
    fn shutdown(&mut self) {}
}

/// The table of attached units.
pub struct UnitTable {
    slots: [Option<Box<dyn Unit>>; UNITS],
}

impl UnitTable {
    /// Creates a unit table with a [`BufferedTeletype`] on the console
    /// slot and everything else empty.
    pub fn new() -> Self {
        let mut table = Self { slots: std::array::from_fn(|_| None) };
        table.attach(CONSOLE_UNIT, BufferedTeletype::default());
        table
    }

    /// Creates a table with every slot empty, console included.
    pub fn empty() -> Self {
        Self { slots: std::array::from_fn(|_| None) }
    }

    /// Attaches a unit at the given slot, shutting down any previous
    /// occupant. Unit numbers past the table are ignored.
    pub fn attach(&mut self, unit: u8, dev: impl Unit) {
        if let Some(slot) = self.slots.get_mut(usize::from(unit)) {
            if let Some(mut old) = slot.replace(Box::new(dev)) {
                old.shutdown();
            }
        }
    }

    /// Detaches the unit at the given slot, shutting it down.
    pub fn detach(&mut self, unit: u8) {
        if let Some(mut old) = self.slots.get_mut(usize::from(unit)).and_then(Option::take) {
            old.shutdown();
        }
    }

    /// Whether a unit is attached at the given slot.
    pub fn is_attached(&self, unit: u8) -> bool {
        self.slots.get(usize::from(unit)).is_some_and(Option::is_some)
    }

    /// Gets the unit at the given slot.
    pub fn get_mut(&mut self, unit: u8) -> Option<&mut dyn Unit> {
        match self.slots.get_mut(usize::from(unit))? {
            Some(dev) => Some(&mut **dev),
            None => None,
        }
    }

    /// Polls every attached unit's interrupt lines.
    pub(super) fn poll_interrupts(&mut self, fold: &mut impl FnMut([u16; 8])) {
        for dev in self.slots.iter_mut().flatten() {
            let lines = dev.interrupts();
            if lines != [0; 8] {
                fold(lines);
            }
        }
    }

    /// Shuts down every attached unit.
    pub fn shutdown_all(&mut self) {
        for dev in self.slots.iter_mut().flatten() {
            dev.shutdown();
        }
    }
}

impl Default for UnitTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UnitTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let attached: Vec<usize> = self.slots.iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect();
        f.debug_struct("UnitTable")
            .field("attached", &attached)
            .finish()
    }
}

/// Never ready, never interrupts.
///
/// Attaching this is distinct from leaving a slot empty only in that the
/// slot reads as occupied.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct NullUnit;
impl Unit for NullUnit {
    fn command_ready(&mut self) -> bool {
        false
    }

    fn write_ready(&mut self) -> bool {
        false
    }

    fn read_ready(&mut self) -> bool {
        false
    }

    fn command(&mut self, _word: i16) -> bool {
        false
    }

    fn write(&mut self, _word: i16) -> bool {
        false
    }

    fn read(&mut self) -> Option<i16> {
        None
    }

    fn test(&mut self, _word: i16) -> bool {
        false
    }
}

/// A unit that asserts interrupt request lines from a function.
///
/// Useful for injecting interrupts without modelling a whole peripheral.
#[allow(clippy::type_complexity)]
pub struct InterruptLine(Box<dyn FnMut() -> [u16; 8] + Send + 'static>);
impl InterruptLine {
    /// Creates an interrupt line from a function producing per-group
    /// request masks.
    pub fn new(f: impl FnMut() -> [u16; 8] + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Creates a line that asserts `level` in `group` exactly once.
    pub fn once(group: usize, level: u16) -> Self {
        let mut fired = false;
        Self::new(move || {
            let mut lines = [0; 8];
            if !fired && group < 8 {
                lines[group] = level;
                fired = true;
            }
            lines
        })
    }
}
impl std::fmt::Debug for InterruptLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptLine").finish_non_exhaustive()
    }
}
impl Unit for InterruptLine {
    fn command_ready(&mut self) -> bool {
        false
    }

    fn write_ready(&mut self) -> bool {
        false
    }

    fn read_ready(&mut self) -> bool {
        false
    }

    fn command(&mut self, _word: i16) -> bool {
        false
    }

    fn write(&mut self, _word: i16) -> bool {
        false
    }

    fn read(&mut self) -> Option<i16> {
        None
    }

    fn test(&mut self, _word: i16) -> bool {
        false
    }

    fn interrupts(&mut self) -> [u16; 8] {
        (self.0)()
    }
}

fn resolve_lock<G>(e: std::sync::TryLockResult<G>) -> Option<G> {
    use std::sync::TryLockError;

    match e {
        Ok(guard) => Some(guard),
        Err(TryLockError::WouldBlock) => None,
        Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
    }
}

impl<D: Unit> Unit for std::sync::Arc<std::sync::Mutex<D>> {
    fn command_ready(&mut self) -> bool {
        resolve_lock(self.try_lock()).is_some_and(|mut g| g.command_ready())
    }

    fn write_ready(&mut self) -> bool {
        resolve_lock(self.try_lock()).is_some_and(|mut g| g.write_ready())
    }

    fn read_ready(&mut self) -> bool {
        resolve_lock(self.try_lock()).is_some_and(|mut g| g.read_ready())
    }

    fn command(&mut self, word: i16) -> bool {
        resolve_lock(self.try_lock()).is_some_and(|mut g| g.command(word))
    }

    fn write(&mut self, word: i16) -> bool {
        resolve_lock(self.try_lock()).is_some_and(|mut g| g.write(word))
    }

    fn read(&mut self) -> Option<i16> {
        resolve_lock(self.try_lock()).and_then(|mut g| g.read())
    }

    fn test(&mut self, word: i16) -> bool {
        resolve_lock(self.try_lock()).is_some_and(|mut g| g.test(word))
    }

    fn interrupts(&mut self) -> [u16; 8] {
        resolve_lock(self.try_lock()).map_or([0; 8], |mut g| g.interrupts())
    }

    fn shutdown(&mut self) {
        if let Some(mut g) = resolve_lock(self.try_lock()) {
            g.shutdown();
        }
    }
}

/// A parsed device-attachment destination.
///
/// The attach convention is `host` or `host:port`; when the port is
/// omitted it defaults to `8100 + unit`. Transport setup from a parsed
/// destination is a front-end concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Destination {
    /// Parses a destination string for the given unit number.
    ///
    /// Fails without side effects on an empty string or an unparseable or
    /// out-of-range port; the caller should leave the unit slot
    /// unconfigured in that case.
    pub fn parse(dest: &str, unit: u8) -> Result<Self, AttachError> {
        if dest.is_empty() {
            return Err(AttachError::EmptyDestination);
        }
        match dest.split_once(':') {
            None => Ok(Self {
                host: dest.to_string(),
                port: 8100 + u16::from(unit),
            }),
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|&p| p >= 1)
                    .ok_or_else(|| AttachError::BadPort(port.to_string()))?;
                Ok(Self { host: host.to_string(), port })
            }
        }
    }
}

/// Failure to parse a device-attachment destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    /// The destination string was empty.
    EmptyDestination,
    /// The port portion was unparseable or out of range.
    BadPort(String),
}

impl std::fmt::Display for AttachError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachError::EmptyDestination => f.write_str("empty attach destination"),
            AttachError::BadPort(p) => write!(f, "unrecognized TCP port: {p}"),
        }
    }
}
impl std::error::Error for AttachError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_defaults_port_from_unit() {
        let d = Destination::parse("host", 9).unwrap();
        assert_eq!(d, Destination { host: "host".into(), port: 8109 });
    }

    #[test]
    fn destination_with_explicit_port() {
        let d = Destination::parse("10.0.0.2:2000", 3).unwrap();
        assert_eq!(d, Destination { host: "10.0.0.2".into(), port: 2000 });
    }

    #[test]
    fn destination_rejects_bad_ports() {
        assert!(matches!(Destination::parse("h:0", 0), Err(AttachError::BadPort(_))));
        assert!(matches!(Destination::parse("h:70000", 0), Err(AttachError::BadPort(_))));
        assert!(matches!(Destination::parse("h:abc", 0), Err(AttachError::BadPort(_))));
        assert!(matches!(Destination::parse("", 0), Err(AttachError::EmptyDestination)));
    }

    #[test]
    fn attach_replaces_and_detach_clears() {
        let mut table = UnitTable::empty();
        assert!(!table.is_attached(5));
        table.attach(5, NullUnit);
        assert!(table.is_attached(5));
        table.detach(5);
        assert!(!table.is_attached(5));
    }

    #[test]
    fn interrupt_line_once_fires_once() {
        let mut line = InterruptLine::once(2, 0x008);
        let mut lines = [0; 8];
        lines[2] = 0x008;
        assert_eq!(line.interrupts(), lines);
        assert_eq!(line.interrupts(), [0; 8]);
    }
}
