// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
mod db;
mod permissions;

pub use db::{ChatItem, ChatStore, ChatSummary, RawExchange, RawResponse, Role, StoreError, UserRecord};
pub use permissions::PermissionScope;
