#[tokio::main]
async fn main() -> anyhow::Result<()> {
    labwatch::run(std::env::args().skip(1).collect()).await
}
