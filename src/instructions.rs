// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of OpenEthereum.

// OpenEthereum is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// OpenEthereum is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with OpenEthereum.  If not, see <http://www.gnu.org/licenses/>.

//! Opcode table: the static mapping from an opcode byte to its mnemonic,
//! stack in/out arity, and the handful of opcode-shaped metadata the
//! gasometer and analyzer need before they can execute it.

use std::collections::HashMap;

macro_rules! opcodes {
    ($($konst:ident => ($val:expr, $name:expr, $args:expr, $ret:expr)),* $(,)?) => {
        /// One EVM opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[allow(non_camel_case_types)]
        pub enum Instruction {
            $($konst),*
        }

        impl Instruction {
            /// Decode a raw opcode byte, or `None` if unassigned.
            pub fn from_u8(value: u8) -> Option<Instruction> {
                match value {
                    $($val => Some(Instruction::$konst),)*
                    _ => None,
                }
            }

            /// The raw opcode byte.
            pub fn as_u8(self) -> u8 {
                match self {
                    $(Instruction::$konst => $val),*
                }
            }

            /// Static stack-effect/name metadata for this instruction.
            pub fn info(self) -> &'static InstructionInfo {
                lazy_static::lazy_static! {
                    static ref TABLE: HashMap<Instruction, InstructionInfo> = {
                        let mut m = HashMap::new();
                        $(m.insert(Instruction::$konst, InstructionInfo { name: $name, args: $args, ret: $ret });)*
                        m
                    };
                }
                TABLE.get(&self).expect("every Instruction variant is present in TABLE; qed")
            }
        }
    };
}

opcodes! {
    STOP => (0x00, "STOP", 0, 0),
    ADD => (0x01, "ADD", 2, 1),
    MUL => (0x02, "MUL", 2, 1),
    SUB => (0x03, "SUB", 2, 1),
    DIV => (0x04, "DIV", 2, 1),
    SDIV => (0x05, "SDIV", 2, 1),
    MOD => (0x06, "MOD", 2, 1),
    SMOD => (0x07, "SMOD", 2, 1),
    ADDMOD => (0x08, "ADDMOD", 3, 1),
    MULMOD => (0x09, "MULMOD", 3, 1),
    EXP => (0x0a, "EXP", 2, 1),
    SIGNEXTEND => (0x0b, "SIGNEXTEND", 2, 1),

    LT => (0x10, "LT", 2, 1),
    GT => (0x11, "GT", 2, 1),
    SLT => (0x12, "SLT", 2, 1),
    SGT => (0x13, "SGT", 2, 1),
    EQ => (0x14, "EQ", 2, 1),
    ISZERO => (0x15, "ISZERO", 1, 1),
    AND => (0x16, "AND", 2, 1),
    OR => (0x17, "OR", 2, 1),
    XOR => (0x18, "XOR", 2, 1),
    NOT => (0x19, "NOT", 1, 1),
    BYTE => (0x1a, "BYTE", 2, 1),
    SHL => (0x1b, "SHL", 2, 1),
    SHR => (0x1c, "SHR", 2, 1),
    SAR => (0x1d, "SAR", 2, 1),

    SHA3 => (0x20, "SHA3", 2, 1),

    ADDRESS => (0x30, "ADDRESS", 0, 1),
    BALANCE => (0x31, "BALANCE", 1, 1),
    ORIGIN => (0x32, "ORIGIN", 0, 1),
    CALLER => (0x33, "CALLER", 0, 1),
    CALLVALUE => (0x34, "CALLVALUE", 0, 1),
    CALLDATALOAD => (0x35, "CALLDATALOAD", 1, 1),
    CALLDATASIZE => (0x36, "CALLDATASIZE", 0, 1),
    CALLDATACOPY => (0x37, "CALLDATACOPY", 3, 0),
    CODESIZE => (0x38, "CODESIZE", 0, 1),
    CODECOPY => (0x39, "CODECOPY", 3, 0),
    GASPRICE => (0x3a, "GASPRICE", 0, 1),
    EXTCODESIZE => (0x3b, "EXTCODESIZE", 1, 1),
    EXTCODECOPY => (0x3c, "EXTCODECOPY", 4, 0),
    RETURNDATASIZE => (0x3d, "RETURNDATASIZE", 0, 1),
    RETURNDATACOPY => (0x3e, "RETURNDATACOPY", 3, 0),
    EXTCODEHASH => (0x3f, "EXTCODEHASH", 1, 1),

    BLOCKHASH => (0x40, "BLOCKHASH", 1, 1),
    COINBASE => (0x41, "COINBASE", 0, 1),
    TIMESTAMP => (0x42, "TIMESTAMP", 0, 1),
    NUMBER => (0x43, "NUMBER", 0, 1),
    DIFFICULTY => (0x44, "DIFFICULTY", 0, 1),
    GASLIMIT => (0x45, "GASLIMIT", 0, 1),
    CHAINID => (0x46, "CHAINID", 0, 1),
    SELFBALANCE => (0x47, "SELFBALANCE", 0, 1),
    BASEFEE => (0x48, "BASEFEE", 0, 1),

    POP => (0x50, "POP", 1, 0),
    MLOAD => (0x51, "MLOAD", 1, 1),
    MSTORE => (0x52, "MSTORE", 2, 0),
    MSTORE8 => (0x53, "MSTORE8", 2, 0),
    SLOAD => (0x54, "SLOAD", 1, 1),
    SSTORE => (0x55, "SSTORE", 2, 0),
    JUMP => (0x56, "JUMP", 1, 0),
    JUMPI => (0x57, "JUMPI", 2, 0),
    PC => (0x58, "PC", 0, 1),
    MSIZE => (0x59, "MSIZE", 0, 1),
    GAS => (0x5a, "GAS", 0, 1),
    JUMPDEST => (0x5b, "JUMPDEST", 0, 0),
    TLOAD => (0x5c, "TLOAD", 1, 1),
    TSTORE => (0x5d, "TSTORE", 2, 0),
    MCOPY => (0x5e, "MCOPY", 3, 0),
    PUSH0 => (0x5f, "PUSH0", 0, 1),

    PUSH1 => (0x60, "PUSH1", 0, 1),
    PUSH2 => (0x61, "PUSH2", 0, 1),
    PUSH3 => (0x62, "PUSH3", 0, 1),
    PUSH4 => (0x63, "PUSH4", 0, 1),
    PUSH5 => (0x64, "PUSH5", 0, 1),
    PUSH6 => (0x65, "PUSH6", 0, 1),
    PUSH7 => (0x66, "PUSH7", 0, 1),
    PUSH8 => (0x67, "PUSH8", 0, 1),
    PUSH9 => (0x68, "PUSH9", 0, 1),
    PUSH10 => (0x69, "PUSH10", 0, 1),
    PUSH11 => (0x6a, "PUSH11", 0, 1),
    PUSH12 => (0x6b, "PUSH12", 0, 1),
    PUSH13 => (0x6c, "PUSH13", 0, 1),
    PUSH14 => (0x6d, "PUSH14", 0, 1),
    PUSH15 => (0x6e, "PUSH15", 0, 1),
    PUSH16 => (0x6f, "PUSH16", 0, 1),
    PUSH17 => (0x70, "PUSH17", 0, 1),
    PUSH18 => (0x71, "PUSH18", 0, 1),
    PUSH19 => (0x72, "PUSH19", 0, 1),
    PUSH20 => (0x73, "PUSH20", 0, 1),
    PUSH21 => (0x74, "PUSH21", 0, 1),
    PUSH22 => (0x75, "PUSH22", 0, 1),
    PUSH23 => (0x76, "PUSH23", 0, 1),
    PUSH24 => (0x77, "PUSH24", 0, 1),
    PUSH25 => (0x78, "PUSH25", 0, 1),
    PUSH26 => (0x79, "PUSH26", 0, 1),
    PUSH27 => (0x7a, "PUSH27", 0, 1),
    PUSH28 => (0x7b, "PUSH28", 0, 1),
    PUSH29 => (0x7c, "PUSH29", 0, 1),
    PUSH30 => (0x7d, "PUSH30", 0, 1),
    PUSH31 => (0x7e, "PUSH31", 0, 1),
    PUSH32 => (0x7f, "PUSH32", 0, 1),

    DUP1 => (0x80, "DUP1", 1, 2),
    DUP2 => (0x81, "DUP2", 2, 3),
    DUP3 => (0x82, "DUP3", 3, 4),
    DUP4 => (0x83, "DUP4", 4, 5),
    DUP5 => (0x84, "DUP5", 5, 6),
    DUP6 => (0x85, "DUP6", 6, 7),
    DUP7 => (0x86, "DUP7", 7, 8),
    DUP8 => (0x87, "DUP8", 8, 9),
    DUP9 => (0x88, "DUP9", 9, 10),
    DUP10 => (0x89, "DUP10", 10, 11),
    DUP11 => (0x8a, "DUP11", 11, 12),
    DUP12 => (0x8b, "DUP12", 12, 13),
    DUP13 => (0x8c, "DUP13", 13, 14),
    DUP14 => (0x8d, "DUP14", 14, 15),
    DUP15 => (0x8e, "DUP15", 15, 16),
    DUP16 => (0x8f, "DUP16", 16, 17),

    SWAP1 => (0x90, "SWAP1", 2, 2),
    SWAP2 => (0x91, "SWAP2", 3, 3),
    SWAP3 => (0x92, "SWAP3", 4, 4),
    SWAP4 => (0x93, "SWAP4", 5, 5),
    SWAP5 => (0x94, "SWAP5", 6, 6),
    SWAP6 => (0x95, "SWAP6", 7, 7),
    SWAP7 => (0x96, "SWAP7", 8, 8),
    SWAP8 => (0x97, "SWAP8", 9, 9),
    SWAP9 => (0x98, "SWAP9", 10, 10),
    SWAP10 => (0x99, "SWAP10", 11, 11),
    SWAP11 => (0x9a, "SWAP11", 12, 12),
    SWAP12 => (0x9b, "SWAP12", 13, 13),
    SWAP13 => (0x9c, "SWAP13", 14, 14),
    SWAP14 => (0x9d, "SWAP14", 15, 15),
    SWAP15 => (0x9e, "SWAP15", 16, 16),
    SWAP16 => (0x9f, "SWAP16", 17, 17),

    LOG0 => (0xa0, "LOG0", 2, 0),
    LOG1 => (0xa1, "LOG1", 3, 0),
    LOG2 => (0xa2, "LOG2", 4, 0),
    LOG3 => (0xa3, "LOG3", 5, 0),
    LOG4 => (0xa4, "LOG4", 6, 0),

    CREATE => (0xf0, "CREATE", 3, 1),
    CALL => (0xf1, "CALL", 7, 1),
    CALLCODE => (0xf2, "CALLCODE", 7, 1),
    RETURN => (0xf3, "RETURN", 2, 0),
    DELEGATECALL => (0xf4, "DELEGATECALL", 6, 1),
    CREATE2 => (0xf5, "CREATE2", 4, 1),
    STATICCALL => (0xfa, "STATICCALL", 6, 1),
    REVERT => (0xfd, "REVERT", 2, 0),
    INVALID => (0xfe, "INVALID", 0, 0),
    SELFDESTRUCT => (0xff, "SELFDESTRUCT", 1, 0),

    BEGINSUB => (0xd6, "BEGINSUB", 0, 0),
    RETURNSUB => (0xd7, "RETURNSUB", 0, 0),
    JUMPSUB => (0xd8, "JUMPSUB", 1, 0),
}

/// Static per-instruction metadata: name plus stack arity.
#[derive(Debug, Clone, Copy)]
pub struct InstructionInfo {
    /// Mnemonic, used in error messages and tracing.
    pub name: &'static str,
    /// Number of stack elements popped.
    pub args: usize,
    /// Number of stack elements pushed (net new height after the op, i.e.
    /// for `DUPn`/`SWAPn` this follows the teacher's convention of tracking
    /// cumulative stack height rather than a plain push count).
    pub ret: usize,
}

impl Instruction {
    /// Number of immediate bytes following a `PUSHn`, or `None` otherwise.
    pub fn push_bytes(self) -> Option<usize> {
        let op = self.as_u8();
        if (0x60..=0x7f).contains(&op) {
            Some((op - 0x5f) as usize)
        } else {
            None
        }
    }

    /// 1-based dup source position for `DUPn`, or `None` otherwise.
    pub fn dup_position(self) -> Option<usize> {
        let op = self.as_u8();
        if (0x80..=0x8f).contains(&op) {
            Some((op - 0x80 + 1) as usize)
        } else {
            None
        }
    }

    /// 1-based swap counterpart position for `SWAPn`, or `None` otherwise.
    pub fn swap_position(self) -> Option<usize> {
        let op = self.as_u8();
        if (0x90..=0x9f).contains(&op) {
            Some((op - 0x90 + 1) as usize)
        } else {
            None
        }
    }

    /// Number of topics for a `LOGn`, or `None` otherwise.
    pub fn log_topics(self) -> Option<usize> {
        let op = self.as_u8();
        if (0xa0..=0xa4).contains(&op) {
            Some((op - 0xa0) as usize)
        } else {
            None
        }
    }

    /// Whether this opcode unconditionally ends a basic block (§4.4): it
    /// either halts the frame or transfers control unconditionally.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Instruction::STOP
                | Instruction::RETURN
                | Instruction::REVERT
                | Instruction::INVALID
                | Instruction::SELFDESTRUCT
                | Instruction::JUMP
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_opcodes() {
        assert_eq!(Instruction::from_u8(0x01), Some(Instruction::ADD));
        assert_eq!(Instruction::from_u8(0x60), Some(Instruction::PUSH1));
        assert_eq!(Instruction::from_u8(0x0c), None);
    }

    #[test]
    fn push_bytes_span_full_range() {
        assert_eq!(Instruction::PUSH1.push_bytes(), Some(1));
        assert_eq!(Instruction::PUSH32.push_bytes(), Some(32));
        assert_eq!(Instruction::ADD.push_bytes(), None);
    }

    #[test]
    fn dup_and_swap_positions() {
        assert_eq!(Instruction::DUP1.dup_position(), Some(1));
        assert_eq!(Instruction::DUP16.dup_position(), Some(16));
        assert_eq!(Instruction::SWAP1.swap_position(), Some(1));
        assert_eq!(Instruction::SWAP16.swap_position(), Some(16));
    }

    #[test]
    fn terminators_match_spec_list() {
        assert!(Instruction::STOP.is_terminator());
        assert!(Instruction::JUMP.is_terminator());
        assert!(!Instruction::JUMPI.is_terminator());
        assert!(!Instruction::ADD.is_terminator());
    }
}
