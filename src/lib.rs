pub mod api;
pub mod config;
pub mod db;
pub mod ledger;
pub mod mailer;
pub mod prom_metrics;
