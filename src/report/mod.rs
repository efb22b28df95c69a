//! Report rendering.

pub mod generator;

pub use generator::{
    generate_json_report, generate_markdown_report, report_file_name, write_report,
    ReportOptions,
};
