// src/storage/mod.rs
pub mod db_connect;
pub mod queries;
