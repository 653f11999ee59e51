#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut once = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--once" => once = true,
            other => {
                eprintln!("gradeflow-worker: unknown argument {other}");
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = gradeflow::run_worker(once).await {
        eprintln!("gradeflow-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
