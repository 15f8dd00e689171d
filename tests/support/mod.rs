#![allow(dead_code)]

pub mod photo;
pub mod widget;
