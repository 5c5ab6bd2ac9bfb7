//! Transport channels exposing the node to the outside world.

pub mod web;
