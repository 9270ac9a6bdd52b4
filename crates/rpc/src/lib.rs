// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local-socket RPC transport.
//!
//! Wire format: 1 tag byte, 4-byte big-endian length, payload. JSON-RPC 2.0
//! messages travel as the payload of `request` / `response` / `notification`
//! frames; `heartbeat` frames carry no payload and are echoed by both ends.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod client;
pub mod endpoint;
pub mod frame;
pub mod jsonrpc;
pub mod methods;
pub mod server;

pub use client::{ClientConfig, ClientError, RpcClient};
pub use endpoint::Endpoint;
pub use frame::{
    encode_frame, Frame, FrameDecoder, FrameKind, TransportError, DEFAULT_MAX_MESSAGE_SIZE,
};
pub use jsonrpc::{codes, RequestId, RpcError, RpcRequest, RpcResponse};
pub use methods::{ConnId, MethodHandler, Methods};
pub use server::{RpcServer, ServerConfig, DEFAULT_MAX_CONNECTIONS};
