fn main() {
    if let Err(error) = watchlist_desktop_lib::run() {
        tracing::error!("watchlist-desktop failed: {error}");
        std::process::exit(1);
    }
}
