//! Sender grouping for scan results

mod aggregator;
mod headers;

pub use aggregator::{SenderAggregator, aggregate};
pub use headers::{
    DATE, FROM, METADATA_HEADERS, SUBJECT, advertises_one_click, extract_action_link, header_value, message_date, parse_date,
};

pub(crate) use headers::is_http;
