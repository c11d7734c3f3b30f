//! Chat ingress channels.

pub mod web;
