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

//! Debug hook surface (§4.8). The teacher's `Informant` is a nullable
//! function-pointer-shaped tracer called once per opcode with zero overhead
//! when unset; here that's an `Option<&mut dyn StepHook>` threaded through
//! dispatch instead of a raw pointer.

use ethereum_types::{Address, U256};

use crate::instructions::Instruction;

/// What the interpreter should do after a hook call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Proceed with this instruction normally.
    Continue,
    /// Suspend before executing this instruction; `step()` returns
    /// `StepResult::Paused` without mutating frame state.
    Pause,
    /// Unwind the entire interpreter stack with `Error::DebugAbort`.
    Abort,
}

/// A read-only view of the frame state at the point a hook is invoked,
/// cheap to construct since it borrows rather than copies.
pub struct StepContext<'a> {
    pub pc: u32,
    pub instruction: Instruction,
    pub gas_left: u64,
    pub depth: usize,
    pub stack_top: &'a [U256],
}

/// Per-opcode tracing/breakpoint hook.
pub trait StepHook {
    fn on_step(&mut self, ctx: &StepContext<'_>) -> StepAction;
}

/// Context passed to a [`MessageHook`] at call/create frame boundaries.
pub struct MessageContext {
    pub caller: Address,
    pub callee: Address,
    pub value: U256,
    pub gas: u64,
    pub depth: usize,
    pub is_create: bool,
}

/// Call/create frame-boundary hook (entry and exit).
pub trait MessageHook {
    fn on_enter(&mut self, ctx: &MessageContext) -> StepAction;
    fn on_exit(&mut self, ctx: &MessageContext, success: bool);
}

/// Bundles both hook kinds so the orchestrator only has to thread one
/// `Option<&mut dyn DebugHooks>` through frame setup.
pub trait DebugHooks: StepHook + MessageHook {}
impl<T: StepHook + MessageHook> DebugHooks for T {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        steps: usize,
        abort_after: usize,
    }

    impl StepHook for Recorder {
        fn on_step(&mut self, _ctx: &StepContext<'_>) -> StepAction {
            self.steps += 1;
            if self.steps >= self.abort_after {
                StepAction::Abort
            } else {
                StepAction::Continue
            }
        }
    }

    impl MessageHook for Recorder {
        fn on_enter(&mut self, _ctx: &MessageContext) -> StepAction {
            StepAction::Continue
        }
        fn on_exit(&mut self, _ctx: &MessageContext, _success: bool) {}
    }

    #[test]
    fn aborts_after_configured_step_count() {
        let mut recorder = Recorder {
            steps: 0,
            abort_after: 2,
        };
        let ctx = StepContext {
            pc: 0,
            instruction: Instruction::STOP,
            gas_left: 100,
            depth: 0,
            stack_top: &[],
        };
        assert_eq!(recorder.on_step(&ctx), StepAction::Continue);
        assert_eq!(recorder.on_step(&ctx), StepAction::Abort);
    }
}
