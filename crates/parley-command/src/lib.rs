//! Command grammar, handler registry, and action values for Parley bots.
//!
//! Everything in this crate is a pure data structure: the match-expression
//! builder, the priority-ordered grammar, the handler registry, and the
//! `Action` values handlers return. No I/O happens here; the engine crate
//! interprets these values against a live connection.

pub mod action;
pub mod expr;
pub mod grammar;
pub mod registry;

pub use action::{
    Action, DeliveryCallback, HistoryCallback, HistoryQuery, HistoryRecord, SendMessage,
    UploadFile,
};
pub use expr::{ExprError, MatchExpr};
pub use grammar::{CommandGrammar, MatchArgs, MatchedCommand};
pub use registry::{
    CommandCall, CommandHandler, CommandSet, CommandSpec, HandlerRecord, HandlerRegistry,
    MessageCall, MessageHandler, UnfilteredRecord, WatcherSpec,
};
