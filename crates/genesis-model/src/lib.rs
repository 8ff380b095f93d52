// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
mod factory;
mod mock;
mod openai_compat;
mod provider;
mod secrets;

pub use factory::ProviderFactory;
pub use mock::{MockProvider, ScriptedMockProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{
    ChatMessage, GenerationRequest, MissingCredential, ModelProvider, ProviderEvent,
    ProviderStream,
};
pub use secrets::SecretStore;
