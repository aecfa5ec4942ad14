/// httpmock needs a loopback listener; some sandboxes refuse one.
pub fn should_skip_httpmock() -> bool {
    if std::net::TcpListener::bind(("127.0.0.1", 0)).is_ok() {
        return false;
    }
    eprintln!("skipping httpmock test: sandbox forbids binding to localhost");
    true
}
