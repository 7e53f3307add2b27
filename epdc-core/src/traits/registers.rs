//! Controller register access

/// Word-wide access to the controller's register block
///
/// Offsets are relative to the block base, see [`crate::regs`].
pub trait RegisterBus {
    /// Write a 32-bit register
    fn write(&mut self, offset: u32, value: u32);

    /// Read a 32-bit register
    fn read(&mut self, offset: u32) -> u32;

    /// Read-modify-write helper
    fn modify(&mut self, offset: u32, f: impl FnOnce(u32) -> u32) {
        let value = self.read(offset);
        self.write(offset, f(value));
    }
}
