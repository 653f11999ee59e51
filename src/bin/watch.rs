#[tokio::main]
async fn main() {
    match gradeflow::run_watch(std::env::args().skip(1).collect()).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("gradeflow-watch fatal: {e:#}");
            std::process::exit(1);
        }
    }
}
