// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
mod cron;
mod tasks;

pub use cron::schedule_matches;
pub use tasks::{Task, TaskScheduler, TaskStatus};
