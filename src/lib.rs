//! Prometheus exporter reporting active Moodle users for every tenant schema
//! whose name starts with a configured prefix. Each scrape opens one database
//! connection, counts non-deleted rows in `<schema>.<table-prefix>user`
//! (`mdl_user` by default) and renders the result as
//! `moodle_users_total{dbname="<schema>"}`.

pub mod cli;
pub mod collectors;
pub mod exporter;

pub mod built_info {
    #![allow(clippy::all, clippy::pedantic)]
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
