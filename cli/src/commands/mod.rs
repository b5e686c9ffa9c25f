// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod checkpoint;
pub mod daemon;
pub mod observation;
pub mod rules;

pub use checkpoint::CheckpointCommand;
pub use daemon::DaemonCommand;
pub use observation::{EmitArgs, ObserveArgs, QueryArgs};
pub use rules::RulesCommand;
