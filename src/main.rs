fn main() {
    if handle_cli_flags() {
        return;
    }

    if let Err(err) = social_feed::run(std::env::args().skip(1)) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> bool {
    let mut saw_flag = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("social-feed {}", social_feed::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!("{}", social_feed::app::USAGE);
                saw_flag = true;
            }
            _ => {}
        }
    }
    saw_flag
}
