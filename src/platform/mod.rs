/*
 * This module provides the platform backends topology builders can target.
 * Each backend translates the builder lifecycle into calls on its emulator.
 */

pub mod mininet;

pub use mininet::{MininetNode, MininetPlatform, NetnsPlatform};
