// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod store;

pub use store::{Session, SessionStore, StoreError, COMPACT_RETAIN};

pub type Result<T> = std::result::Result<T, StoreError>;
