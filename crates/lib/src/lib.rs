//! WhatGPT core library: receives chat messages from a messaging bridge, sends images to an
//! image style-transfer backend and text to a chat-completion backend, and replies in the
//! originating conversation.

pub mod bot;
pub mod compose;
pub mod config;
pub mod dispatch;
pub mod event;
pub mod generation;
pub mod init;
pub mod pairing;
pub mod transport;
