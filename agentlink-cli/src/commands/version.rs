//! Version subcommand implementation

pub fn run() {
    println!("agentlink {}", env!("CARGO_PKG_VERSION"));
    println!(
        "protocol: websocket ({}), default proxy {}",
        agentlink::common::TUNNEL_PATH,
        agentlink::common::DEFAULT_SERVER_URL
    );

    #[cfg(target_os = "linux")]
    println!("target: linux");
    #[cfg(target_os = "macos")]
    println!("target: macos");
    #[cfg(target_os = "windows")]
    println!("target: windows");
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    println!("target: unknown");
}
