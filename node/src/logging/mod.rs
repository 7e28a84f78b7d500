use lazy_static::lazy_static;
use serde::Serialize;

lazy_static! {
    pub static ref RUST_LOG_JSON: bool = std::env::var("RUST_LOG_JSON").is_ok();
}

/// Initialises the logger from `RUST_LOG`. Logging stays off when it is not set.
pub fn init() {
    match std::env::var("RUST_LOG") {
        Ok(directives) => init_with_directives(&directives),
        Err(_) => println!("Logging disabled"),
    }
}

pub fn init_with_directives(directives: &str) {
    println!("Logging enabled with directives: {directives}",);
    let _ = pretty_env_logger::formatted_timed_builder()
        .parse_filters(directives)
        .format_timestamp_millis()
        .try_init();
}

pub fn pretty_json<T: Serialize + std::fmt::Debug>(value: &T) -> String {
    if *RUST_LOG_JSON {
        let json = serde_json::json!(&value);
        serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
    } else {
        format!("{value:?}",)
    }
}
