use crate::error::Chip8Error;
use crate::state::{Address, Chip8State, FONT_ADDR, FONT_HEIGHT, Key, Register};

/// One executable opcode. Implementations check every fallible access
/// before mutating state, so an `Err` leaves the machine as it was.
pub trait Instruction {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error>;

    /// Short mnemonic used in trace output.
    fn name(&self) -> &'static str;
}

/// Bit fields of a raw instruction word. Every `u16` decodes; whether the
/// combination means anything is decided by [`lookup`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// The full instruction word.
    pub raw: u16,
    /// First nibble. Selects the instruction family.
    pub opcode: u8,
    /// Second nibble, as a register.
    pub x: Register,
    /// Third nibble, as a register.
    pub y: Register,
    /// Fourth nibble. A 4-bit immediate.
    pub n: u8,
    /// Low byte. An 8-bit immediate.
    pub nn: u8,
    /// Low 12 bits. An address.
    pub nnn: Address,
}

impl DecodedInstruction {
    pub fn new(raw: u16) -> Self {
        DecodedInstruction {
            raw,
            opcode: (raw >> 12) as u8,
            x: Register::from_index((raw >> 8) as u8),
            y: Register::from_index((raw >> 4) as u8),
            n: (raw & 0x000F) as u8,
            nn: (raw & 0x00FF) as u8,
            nnn: raw & 0x0FFF,
        }
    }
}

/// Picks the opcode implementation for a decoded word.
pub fn lookup(decoded: DecodedInstruction) -> Result<Box<dyn Instruction>, Chip8Error> {
    let unknown = Err(Chip8Error::UnknownOpcode {
        opcode: decoded.raw,
    });

    match decoded.opcode {
        0x0 => match decoded.nnn {
            0x0E0 => Ok(Box::new(ClearScreen)),
            0x0EE => Ok(Box::new(SubroutineReturn)),
            // Machine routines (0nnn, including 0000) halt rather than run as no-ops.
            _ => unknown,
        },
        0x1 => Ok(Box::new(Jump(decoded))),
        0x2 => Ok(Box::new(SubroutineCall(decoded))),
        0x3 => Ok(Box::new(SkipEqImmediate(decoded))),
        0x4 => Ok(Box::new(SkipNeqImmediate(decoded))),
        0x5 if decoded.n == 0 => Ok(Box::new(SkipEqRegister(decoded))),
        0x6 => Ok(Box::new(SetImmediate(decoded))),
        0x7 => Ok(Box::new(AddImmediate(decoded))),
        0x8 => match decoded.n {
            0x0 => Ok(Box::new(SetXToY(decoded))),
            0x1 => Ok(Box::new(BinaryOr(decoded))),
            0x2 => Ok(Box::new(BinaryAnd(decoded))),
            0x3 => Ok(Box::new(BinaryXor(decoded))),
            0x4 => Ok(Box::new(AddRegisters(decoded))),
            0x5 => Ok(Box::new(SubtractYFromX(decoded))),
            0x6 => Ok(Box::new(RightShift(decoded))),
            0x7 => Ok(Box::new(SubtractXFromY(decoded))),
            0xE => Ok(Box::new(LeftShift(decoded))),
            _ => unknown,
        },
        0x9 if decoded.n == 0 => Ok(Box::new(SkipNeqRegister(decoded))),
        0xA => Ok(Box::new(SetIndex(decoded))),
        0xB => Ok(Box::new(JumpWithOffset(decoded))),
        0xC => Ok(Box::new(Random(decoded))),
        0xD => Ok(Box::new(Draw(decoded))),
        0xE => match decoded.nn {
            0x9E => Ok(Box::new(SkipIfKeyPressed(decoded))),
            0xA1 => Ok(Box::new(SkipIfKeyNotPressed(decoded))),
            _ => unknown,
        },
        0xF => match decoded.nn {
            0x07 => Ok(Box::new(ReadDelayTimer(decoded))),
            0x0A => Ok(Box::new(WaitForKey(decoded))),
            0x15 => Ok(Box::new(SetDelayTimer(decoded))),
            0x18 => Ok(Box::new(SetSoundTimer(decoded))),
            0x1E => Ok(Box::new(AddToIndex(decoded))),
            0x29 => Ok(Box::new(FontCharacter(decoded))),
            0x33 => Ok(Box::new(BinaryCodedDecimal(decoded))),
            0x55 => Ok(Box::new(StoreRegisters(decoded))),
            0x65 => Ok(Box::new(LoadRegisters(decoded))),
            _ => unknown,
        },
        _ => unknown,
    }
}

/// Steps over the next instruction. The fetch has already moved `pc` past
/// the current one.
fn skip_if(state: &mut Chip8State, condition: bool) {
    if condition {
        state.pc = state.pc.wrapping_add(2);
    }
}

struct ClearScreen;
impl Instruction for ClearScreen {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        state.display.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CLS"
    }
}

struct SubroutineReturn;
impl Instruction for SubroutineReturn {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        state.pc = state.stack.pop()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RET"
    }
}

struct Jump(DecodedInstruction);
impl Instruction for Jump {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        state.pc = self.0.nnn;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "JP"
    }
}

struct SubroutineCall(DecodedInstruction);
impl Instruction for SubroutineCall {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        state.stack.push(state.pc)?;
        state.pc = self.0.nnn;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CALL"
    }
}

struct SkipEqImmediate(DecodedInstruction);
impl Instruction for SkipEqImmediate {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let value_x = state.registers.read(self.0.x);
        skip_if(state, value_x == self.0.nn);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SE"
    }
}

struct SkipNeqImmediate(DecodedInstruction);
impl Instruction for SkipNeqImmediate {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let value_x = state.registers.read(self.0.x);
        skip_if(state, value_x != self.0.nn);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SNE"
    }
}

struct SkipEqRegister(DecodedInstruction);
impl Instruction for SkipEqRegister {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let value_x = state.registers.read(self.0.x);
        let value_y = state.registers.read(self.0.y);
        skip_if(state, value_x == value_y);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SE"
    }
}

struct SkipNeqRegister(DecodedInstruction);
impl Instruction for SkipNeqRegister {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let value_x = state.registers.read(self.0.x);
        let value_y = state.registers.read(self.0.y);
        skip_if(state, value_x != value_y);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SNE"
    }
}

struct SetImmediate(DecodedInstruction);
impl Instruction for SetImmediate {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        state.registers.write(self.0.x, self.0.nn);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LD"
    }
}

/// `7xnn`. Wraps; VF is not touched.
struct AddImmediate(DecodedInstruction);
impl Instruction for AddImmediate {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let value_x = state.registers.read(self.0.x);
        state
            .registers
            .write(self.0.x, value_x.wrapping_add(self.0.nn));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ADD"
    }
}

struct SetXToY(DecodedInstruction);
impl Instruction for SetXToY {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let value_y = state.registers.read(self.0.y);
        state.registers.write(self.0.x, value_y);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LD"
    }
}

/// Shared body of the three bitwise ops, which all reset VF afterwards.
fn bitwise(state: &mut Chip8State, decoded: &DecodedInstruction, op: fn(u8, u8) -> u8) {
    let value_x = state.registers.read(decoded.x);
    let value_y = state.registers.read(decoded.y);
    state.registers.write(decoded.x, op(value_x, value_y));
    state.registers.set_flag(false);
}

struct BinaryOr(DecodedInstruction);
impl Instruction for BinaryOr {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        bitwise(state, &self.0, |x, y| x | y);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "OR"
    }
}

struct BinaryAnd(DecodedInstruction);
impl Instruction for BinaryAnd {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        bitwise(state, &self.0, |x, y| x & y);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "AND"
    }
}

struct BinaryXor(DecodedInstruction);
impl Instruction for BinaryXor {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        bitwise(state, &self.0, |x, y| x ^ y);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "XOR"
    }
}

/// `8xy4`. VF is the carry out of bit 7, written after VX.
struct AddRegisters(DecodedInstruction);
impl Instruction for AddRegisters {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let value_x = state.registers.read(self.0.x);
        let value_y = state.registers.read(self.0.y);
        let (sum, carry) = value_x.overflowing_add(value_y);

        state.registers.write(self.0.x, sum);
        state.registers.set_flag(carry);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ADD"
    }
}

/// `8xy5`. VF is 1 when VX >= VY, i.e. no borrow. Compared before the
/// subtraction, written after VX.
struct SubtractYFromX(DecodedInstruction);
impl Instruction for SubtractYFromX {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let value_x = state.registers.read(self.0.x);
        let value_y = state.registers.read(self.0.y);
        let no_borrow = value_x >= value_y;

        state.registers.write(self.0.x, value_x.wrapping_sub(value_y));
        state.registers.set_flag(no_borrow);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SUB"
    }
}

/// `8xy7`. VX = VY - VX; VF is 1 when VY >= VX.
struct SubtractXFromY(DecodedInstruction);
impl Instruction for SubtractXFromY {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let value_x = state.registers.read(self.0.x);
        let value_y = state.registers.read(self.0.y);
        let no_borrow = value_y >= value_x;

        state.registers.write(self.0.x, value_y.wrapping_sub(value_x));
        state.registers.set_flag(no_borrow);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SUBN"
    }
}

/// `8xy6`. Shifts VY (not VX) into VX; VF gets the bit shifted out.
struct RightShift(DecodedInstruction);
impl Instruction for RightShift {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let value_y = state.registers.read(self.0.y);

        state.registers.write(self.0.x, value_y >> 1);
        state.registers.set_flag(value_y & 0x01 == 1);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SHR"
    }
}

/// `8xyE`. Shifts VY (not VX) into VX; VF gets the bit shifted out.
struct LeftShift(DecodedInstruction);
impl Instruction for LeftShift {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let value_y = state.registers.read(self.0.y);

        state.registers.write(self.0.x, value_y << 1);
        state.registers.set_flag(value_y & 0x80 != 0);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SHL"
    }
}

struct SetIndex(DecodedInstruction);
impl Instruction for SetIndex {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        state.index = self.0.nnn;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LD I"
    }
}

/// `Bnnn`. The offset is added on top of the already-advanced pc, not
/// assigned to it.
struct JumpWithOffset(DecodedInstruction);
impl Instruction for JumpWithOffset {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let offset = self.0.nnn + u16::from(state.registers.read(Register::V0));
        state.pc = state.pc.wrapping_add(offset);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "JP V0"
    }
}

struct Random(DecodedInstruction);
impl Instruction for Random {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let random_value = state.random_byte() & self.0.nn;
        state.registers.write(self.0.x, random_value);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RND"
    }
}

/// `Dxyn`. VF becomes the collision flag once the sprite has been read.
struct Draw(DecodedInstruction);
impl Instruction for Draw {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let x = state.registers.read(self.0.x);
        let y = state.registers.read(self.0.y);

        let collision = state.draw_sprite(x, y, self.0.n)?;
        state.registers.set_flag(collision);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DRW"
    }
}

struct SkipIfKeyPressed(DecodedInstruction);
impl Instruction for SkipIfKeyPressed {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let key = Key::from_index(state.registers.read(self.0.x));
        let is_key_pressed = state.keypad.is_key_pressed(key);
        skip_if(state, is_key_pressed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SKP"
    }
}

struct SkipIfKeyNotPressed(DecodedInstruction);
impl Instruction for SkipIfKeyNotPressed {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let key = Key::from_index(state.registers.read(self.0.x));
        let is_key_pressed = state.keypad.is_key_pressed(key);
        skip_if(state, !is_key_pressed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SKNP"
    }
}

struct ReadDelayTimer(DecodedInstruction);
impl Instruction for ReadDelayTimer {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        state.registers.write(self.0.x, state.delay_timer);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LD DT"
    }
}

struct SetDelayTimer(DecodedInstruction);
impl Instruction for SetDelayTimer {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        state.delay_timer = state.registers.read(self.0.x);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LD DT"
    }
}

struct SetSoundTimer(DecodedInstruction);
impl Instruction for SetSoundTimer {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        state.sound_timer = state.registers.read(self.0.x);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LD ST"
    }
}

/// `Fx0A`. With no key down the pc is rewound so this instruction is
/// fetched again on the next tick.
struct WaitForKey(DecodedInstruction);
impl Instruction for WaitForKey {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        match state.keypad.first_pressed() {
            Some(key) => state.registers.write(self.0.x, key.index()),
            None => state.pc = state.pc.wrapping_sub(2),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LD K"
    }
}

/// `Fx1E`. VF is set when the sum leaves the 12-bit address space and left
/// alone otherwise.
struct AddToIndex(DecodedInstruction);
impl Instruction for AddToIndex {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let value_x = u16::from(state.registers.read(self.0.x));
        if u32::from(state.index) + u32::from(value_x) > 0x0FFF {
            state.registers.set_flag(true);
        }
        state.index = state.index.wrapping_add(value_x);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ADD I"
    }
}

struct FontCharacter(DecodedInstruction);
impl Instruction for FontCharacter {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let digit = u16::from(state.registers.read(self.0.x) & 0x0F);
        state.index = FONT_ADDR + digit * FONT_HEIGHT;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LD F"
    }
}

struct BinaryCodedDecimal(DecodedInstruction);
impl Instruction for BinaryCodedDecimal {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let value_x = state.registers.read(self.0.x);
        let bcd = [value_x / 100, (value_x / 10) % 10, value_x % 10];
        state.memory.write_range(state.index, &bcd)
    }

    fn name(&self) -> &'static str {
        "LD B"
    }
}

/// `Fx55`. Index ends up one past the last byte written.
struct StoreRegisters(DecodedInstruction);
impl Instruction for StoreRegisters {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let count = self.0.x.index() + 1;
        state
            .memory
            .write_range(state.index, &state.registers.as_slice()[..count])?;
        state.index = state.index.wrapping_add(count as u16);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LD [I]"
    }
}

/// `Fx65`. Index ends up one past the last byte read.
struct LoadRegisters(DecodedInstruction);
impl Instruction for LoadRegisters {
    fn execute(&self, state: &mut Chip8State) -> Result<(), Chip8Error> {
        let count = self.0.x.index() + 1;
        let bytes = state.memory.read_range(state.index, count)?;
        for (&reg, &value) in self.0.x.up_to().iter().zip(bytes) {
            state.registers.write(reg, value);
        }
        state.index = state.index.wrapping_add(count as u16);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LD V"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DISPLAY_WIDTH;
    use crate::state::{PC_START_ADDR, RegisterBank};

    /// Machine positioned as if the word at 0x200 had just been fetched.
    fn fetched_state() -> Chip8State {
        let mut state = Chip8State::with_seed(7);
        state.pc = PC_START_ADDR + 2;
        state
    }

    fn exec(state: &mut Chip8State, raw: u16) -> Result<(), Chip8Error> {
        lookup(DecodedInstruction::new(raw))?.execute(state)
    }

    fn set(state: &mut Chip8State, reg: Register, value: u8) {
        state.registers.write(reg, value);
    }

    fn get(state: &Chip8State, reg: Register) -> u8 {
        state.registers.read(reg)
    }

    #[test]
    fn decoder_splits_every_field() {
        let decoded = DecodedInstruction::new(0xD3A7);
        assert_eq!(decoded.raw, 0xD3A7);
        assert_eq!(decoded.opcode, 0xD);
        assert_eq!(decoded.x, Register::V3);
        assert_eq!(decoded.y, Register::VA);
        assert_eq!(decoded.n, 0x7);
        assert_eq!(decoded.nn, 0xA7);
        assert_eq!(decoded.nnn, 0x3A7);
    }

    #[test]
    fn decoder_is_total() {
        for raw in 0..=u16::MAX {
            let decoded = DecodedInstruction::new(raw);
            assert_eq!(u16::from(decoded.opcode) << 12 | decoded.nnn, raw);
        }
    }

    #[test]
    fn unknown_opcodes_are_rejected() {
        for raw in [
            0x0000, 0x0123, 0x00E1, 0x5121, 0x8008, 0x800F, 0x9AB3, 0xE09F, 0xF000, 0xF0FF,
        ] {
            assert!(
                matches!(
                    lookup(DecodedInstruction::new(raw)),
                    Err(Chip8Error::UnknownOpcode { opcode }) if opcode == raw
                ),
                "{raw:#06X} should be unknown"
            );
        }
    }

    #[test]
    fn clear_screen_blanks_display_and_requests_redraw() {
        let mut state = fetched_state();
        state.display.draw_sprite(0, 0, &[0xFF, 0xFF]);
        state.display.clear_redraw();

        exec(&mut state, 0x00E0).unwrap();
        assert_eq!(state.display.lit_pixels(), 0);
        assert!(state.display.needs_redraw());
    }

    #[test]
    fn jump_sets_pc() {
        let mut state = fetched_state();
        exec(&mut state, 0x1ABC).unwrap();
        assert_eq!(state.pc, 0xABC);
    }

    #[test]
    fn call_and_return_round_trip() {
        let mut state = fetched_state();
        exec(&mut state, 0x2400).unwrap();
        assert_eq!(state.pc, 0x400);
        assert_eq!(state.stack.as_slice(), &[0x202]);

        state.pc = 0x402;
        exec(&mut state, 0x00EE).unwrap();
        assert_eq!(state.pc, 0x202);
        assert!(state.stack.is_empty());
    }

    #[test]
    fn call_on_full_stack_changes_nothing() {
        let mut state = fetched_state();
        for depth in 0..16 {
            state.stack.push(0x300 + depth * 2).unwrap();
        }
        let err = exec(&mut state, 0x2400).unwrap_err();
        assert!(matches!(err, Chip8Error::StackOverflow { .. }));
        assert_eq!(state.pc, 0x202);
        assert_eq!(state.stack.len(), 16);
    }

    #[test]
    fn return_on_empty_stack_changes_nothing() {
        let mut state = fetched_state();
        let err = exec(&mut state, 0x00EE).unwrap_err();
        assert!(matches!(err, Chip8Error::StackUnderflow));
        assert_eq!(state.pc, 0x202);
    }

    #[test]
    fn skip_family_adds_two_only_when_condition_holds() {
        let mut state = fetched_state();
        set(&mut state, Register::V1, 0x42);
        set(&mut state, Register::V2, 0x42);
        set(&mut state, Register::V3, 0x07);

        let cases = [
            (0x3142, true),
            (0x3143, false),
            (0x4142, false),
            (0x4143, true),
            (0x5120, true),
            (0x5130, false),
            (0x9120, false),
            (0x9130, true),
        ];
        for (raw, skips) in cases {
            state.pc = 0x202;
            exec(&mut state, raw).unwrap();
            let expected = if skips { 0x204 } else { 0x202 };
            assert_eq!(state.pc, expected, "{raw:#06X}");
        }
    }

    #[test]
    fn add_immediate_wraps_without_touching_vf() {
        let mut state = fetched_state();
        set(&mut state, Register::V4, 0xFF);
        set(&mut state, Register::VF, 0x55);
        exec(&mut state, 0x7402).unwrap();
        assert_eq!(get(&state, Register::V4), 0x01);
        assert_eq!(get(&state, Register::VF), 0x55);

        exec(&mut state, 0x6A17).unwrap();
        assert_eq!(get(&state, Register::VA), 0x17);
    }

    #[test]
    fn add_registers_sets_carry_for_every_pair() {
        let mut state = fetched_state();
        for a in 0..=255u8 {
            for b in 0..=255u8 {
                set(&mut state, Register::V1, a);
                set(&mut state, Register::V2, b);
                exec(&mut state, 0x8124).unwrap();
                assert_eq!(get(&state, Register::V1), a.wrapping_add(b));
                assert_eq!(
                    get(&state, Register::VF),
                    u8::from(u16::from(a) + u16::from(b) > 255)
                );
            }
        }
    }

    #[test]
    fn subtract_sets_no_borrow_flag_for_every_pair() {
        let mut state = fetched_state();
        for a in 0..=255u8 {
            for b in 0..=255u8 {
                set(&mut state, Register::V1, a);
                set(&mut state, Register::V2, b);
                exec(&mut state, 0x8125).unwrap();
                assert_eq!(get(&state, Register::V1), a.wrapping_sub(b));
                assert_eq!(get(&state, Register::VF), u8::from(a >= b));

                set(&mut state, Register::V1, a);
                exec(&mut state, 0x8127).unwrap();
                assert_eq!(get(&state, Register::V1), b.wrapping_sub(a));
                assert_eq!(get(&state, Register::VF), u8::from(b >= a));
            }
        }
    }

    #[test]
    fn flag_wins_when_destination_is_vf() {
        let mut state = fetched_state();
        set(&mut state, Register::VF, 0xF0);
        set(&mut state, Register::V1, 0x20);
        exec(&mut state, 0x8F14).unwrap();
        assert_eq!(get(&state, Register::VF), 1);

        set(&mut state, Register::VF, 0x01);
        set(&mut state, Register::V1, 0x02);
        exec(&mut state, 0x8F15).unwrap();
        assert_eq!(get(&state, Register::VF), 0);
    }

    #[test]
    fn bitwise_ops_reset_vf() {
        let mut state = fetched_state();
        for (raw, expected) in [(0x8121, 0b1110), (0x8122, 0b1000), (0x8123, 0b0110)] {
            set(&mut state, Register::V1, 0b1100);
            set(&mut state, Register::V2, 0b1010);
            set(&mut state, Register::VF, 1);
            exec(&mut state, raw).unwrap();
            assert_eq!(get(&state, Register::V1), expected, "{raw:#06X}");
            assert_eq!(get(&state, Register::VF), 0, "{raw:#06X}");
        }

        set(&mut state, Register::V2, 0x99);
        exec(&mut state, 0x8120).unwrap();
        assert_eq!(get(&state, Register::V1), 0x99);
    }

    #[test]
    fn shifts_read_vy_and_capture_the_lost_bit() {
        let mut state = fetched_state();
        set(&mut state, Register::V1, 0x00);
        set(&mut state, Register::V2, 0b1000_0011);

        exec(&mut state, 0x8126).unwrap();
        assert_eq!(get(&state, Register::V1), 0b0100_0001);
        assert_eq!(get(&state, Register::VF), 1);
        assert_eq!(get(&state, Register::V2), 0b1000_0011);

        exec(&mut state, 0x812E).unwrap();
        assert_eq!(get(&state, Register::V1), 0b0000_0110);
        assert_eq!(get(&state, Register::VF), 1);

        set(&mut state, Register::V2, 0b0100_0010);
        exec(&mut state, 0x8126).unwrap();
        assert_eq!(get(&state, Register::VF), 0);
        exec(&mut state, 0x812E).unwrap();
        assert_eq!(get(&state, Register::VF), 0);
    }

    #[test]
    fn jump_with_offset_adds_to_advanced_pc() {
        let mut state = fetched_state();
        set(&mut state, Register::V0, 0x10);
        exec(&mut state, 0xB100).unwrap();
        assert_eq!(state.pc, 0x202 + 0x100 + 0x10);
    }

    #[test]
    fn set_index_loads_address() {
        let mut state = fetched_state();
        exec(&mut state, 0xA123).unwrap();
        assert_eq!(state.index, 0x123);
    }

    #[test]
    fn random_is_masked_by_immediate() {
        let mut state = fetched_state();
        for _ in 0..256 {
            exec(&mut state, 0xC50F).unwrap();
            assert_eq!(get(&state, Register::V5) & 0xF0, 0);
        }
        exec(&mut state, 0xC500).unwrap();
        assert_eq!(get(&state, Register::V5), 0);
    }

    #[test]
    fn draw_sets_collision_flag_and_is_undone_by_second_draw() {
        let mut state = fetched_state();
        state.index = 0x300;
        state.memory.write_range(0x300, &[0xF0, 0x90, 0xF0]).unwrap();
        set(&mut state, Register::V1, 10);
        set(&mut state, Register::V2, 4);

        exec(&mut state, 0xD123).unwrap();
        assert_eq!(get(&state, Register::VF), 0);
        assert_eq!(state.display.lit_pixels(), 10);
        assert!(state.display.pixel(10, 4));

        exec(&mut state, 0xD123).unwrap();
        assert_eq!(get(&state, Register::VF), 1);
        assert_eq!(state.display.lit_pixels(), 0);
        assert!(state.display.needs_redraw());
    }

    #[test]
    fn draw_wraps_origin_and_clips_overflow() {
        let mut state = fetched_state();
        state.index = 0x300;
        state.memory.write_range(0x300, &[0xFF]).unwrap();
        set(&mut state, Register::V1, (DISPLAY_WIDTH as u8) * 2 + 60);
        set(&mut state, Register::V2, 33);

        exec(&mut state, 0xD121).unwrap();
        assert_eq!(state.display.lit_pixels(), 4);
        assert!(state.display.pixel(63, 1));
        assert!(!state.display.pixel(0, 1));
    }

    #[test]
    fn draw_past_memory_fails_cleanly() {
        let mut state = fetched_state();
        state.index = 0x0FFF;
        set(&mut state, Register::VF, 9);
        let err = exec(&mut state, 0xD002).unwrap_err();
        assert!(matches!(err, Chip8Error::MemoryOutOfBounds { .. }));
        assert_eq!(get(&state, Register::VF), 9);
        assert!(!state.display.needs_redraw());
    }

    #[test]
    fn key_skips_follow_the_keypad() {
        let mut state = fetched_state();
        set(&mut state, Register::V3, 0xA);

        exec(&mut state, 0xE39E).unwrap();
        assert_eq!(state.pc, 0x202);
        exec(&mut state, 0xE3A1).unwrap();
        assert_eq!(state.pc, 0x204);

        state.keypad.press_key(Key::KeyA);
        state.pc = 0x202;
        exec(&mut state, 0xE39E).unwrap();
        assert_eq!(state.pc, 0x204);
        state.pc = 0x202;
        exec(&mut state, 0xE3A1).unwrap();
        assert_eq!(state.pc, 0x202);
    }

    #[test]
    fn timers_copy_to_and_from_registers() {
        let mut state = fetched_state();
        set(&mut state, Register::V6, 30);
        exec(&mut state, 0xF615).unwrap();
        exec(&mut state, 0xF618).unwrap();
        assert_eq!(state.delay_timer, 30);
        assert_eq!(state.sound_timer, 30);

        state.delay_timer = 12;
        exec(&mut state, 0xF707).unwrap();
        assert_eq!(get(&state, Register::V7), 12);
    }

    #[test]
    fn wait_for_key_rewinds_until_a_key_is_down() {
        let mut state = fetched_state();
        exec(&mut state, 0xF20A).unwrap();
        assert_eq!(state.pc, 0x200);

        state.pc = 0x202;
        state.keypad.press_key(Key::KeyC);
        state.keypad.press_key(Key::Key9);
        exec(&mut state, 0xF20A).unwrap();
        assert_eq!(state.pc, 0x202);
        assert_eq!(get(&state, Register::V2), 9);
    }

    #[test]
    fn add_to_index_flags_overflow_past_12_bits() {
        let mut state = fetched_state();
        state.index = 0x0FF0;
        set(&mut state, Register::V1, 0x0F);
        set(&mut state, Register::VF, 0x55);
        exec(&mut state, 0xF11E).unwrap();
        assert_eq!(state.index, 0x0FFF);
        assert_eq!(get(&state, Register::VF), 0x55);

        set(&mut state, Register::V1, 0x01);
        exec(&mut state, 0xF11E).unwrap();
        assert_eq!(state.index, 0x1000);
        assert_eq!(get(&state, Register::VF), 1);
    }

    #[test]
    fn font_character_points_at_glyph() {
        let mut state = fetched_state();
        set(&mut state, Register::V4, 0xB);
        exec(&mut state, 0xF429).unwrap();
        assert_eq!(state.index, FONT_ADDR + 0xB * FONT_HEIGHT);
        assert_eq!(state.memory.read(state.index).unwrap(), 0xE0);
    }

    #[test]
    fn bcd_writes_three_digits() {
        let mut state = fetched_state();
        state.index = 0x300;
        set(&mut state, Register::V0, 254);
        exec(&mut state, 0xF033).unwrap();
        assert_eq!(state.memory.read_range(0x300, 3).unwrap(), &[2, 5, 4]);
        assert_eq!(state.index, 0x300);

        set(&mut state, Register::V0, 7);
        exec(&mut state, 0xF033).unwrap();
        assert_eq!(state.memory.read_range(0x300, 3).unwrap(), &[0, 0, 7]);
    }

    #[test]
    fn store_copies_registers_and_advances_index() {
        let mut state = fetched_state();
        state.index = 0x300;
        set(&mut state, Register::V0, 0x11);
        set(&mut state, Register::V1, 0x22);
        set(&mut state, Register::V2, 0x33);
        set(&mut state, Register::V3, 0x44);

        exec(&mut state, 0xF255).unwrap();
        assert_eq!(state.memory.read_range(0x300, 4).unwrap(), &[0x11, 0x22, 0x33, 0]);
        assert_eq!(state.index, 0x303);
    }

    #[test]
    fn load_fills_registers_and_advances_index() {
        let mut state = fetched_state();
        state.index = 0x300;
        state.memory.write_range(0x300, &[9, 8, 7, 6]).unwrap();

        exec(&mut state, 0xF265).unwrap();
        assert_eq!(&state.registers.as_slice()[..4], &[9, 8, 7, 0]);
        assert_eq!(state.index, 0x303);
    }

    #[test]
    fn block_transfer_past_memory_changes_nothing() {
        let mut state = fetched_state();
        state.index = 0x0FFE;
        set(&mut state, Register::V0, 1);
        let registers_before: RegisterBank = state.registers.clone();

        assert!(exec(&mut state, 0xF255).is_err());
        assert_eq!(state.memory.read(0x0FFE).unwrap(), 0);
        assert_eq!(state.index, 0x0FFE);

        assert!(exec(&mut state, 0xF265).is_err());
        assert_eq!(state.registers, registers_before);
        assert_eq!(state.index, 0x0FFE);
    }
}
