/// Parses the config file path from command-line arguments
pub fn config_path(default: &str) -> String {
    path_from_args(std::env::args(), default)
}

fn path_from_args<I: Iterator<Item = String>>(mut args: I, default: &str) -> String {
    args.nth(1).unwrap_or_else(|| default.to_string())
}
