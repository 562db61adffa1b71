use anyhow::Result;

fn main() -> Result<()> {
    specbox::cli::run()
}
