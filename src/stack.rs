use crate::error::Chip8Error;
use crate::state::Address;

pub const STACK_CAPACITY: usize = 16;

/// Fixed-capacity LIFO of subroutine return addresses.
///
/// Failed pushes and pops leave the stack exactly as it was.
#[derive(Debug, Clone)]
pub struct CallStack {
    slots: [Address; STACK_CAPACITY],
    len: usize,
}

impl CallStack {
    pub fn new() -> Self {
        CallStack {
            slots: [0; STACK_CAPACITY],
            len: 0,
        }
    }

    pub fn push(&mut self, address: Address) -> Result<(), Chip8Error> {
        if self.is_full() {
            return Err(Chip8Error::StackOverflow {
                capacity: STACK_CAPACITY,
            });
        }
        self.slots[self.len] = address;
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Address, Chip8Error> {
        if self.is_empty() {
            return Err(Chip8Error::StackUnderflow);
        }
        self.len -= 1;
        Ok(self.slots[self.len])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == STACK_CAPACITY
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Live entries, bottom of the stack first.
    pub fn as_slice(&self) -> &[Address] {
        &self.slots[..self.len]
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}
