//! Project registration commands: `cidx project add` and `cidx project list`.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::store::{IndexStore, SqliteStore};

/// Register a new project rooted at `root` and print its id.
///
/// The root must be an existing directory; it is stored canonicalized so
/// later runs are independent of the working directory.
pub async fn run_project_add(config: &Config, name: &str, root: &Path) -> Result<()> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Project root not found: {}", root.display()))?;
    if !root.is_dir() {
        bail!("Project root is not a directory: {}", root.display());
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let project = store
        .create_project(name, &root.to_string_lossy())
        .await;
    pool.close().await;
    let project = project?;

    println!("{}", project.id);
    Ok(())
}

/// Print every registered project, newest last.
pub async fn run_project_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let projects = store.list_projects().await;
    pool.close().await;
    let projects = projects?;

    if projects.is_empty() {
        println!("No projects registered.");
        return Ok(());
    }

    println!("{:<36}  {:<20} {:<10} ROOT", "ID", "NAME", "STATUS");
    for p in &projects {
        println!(
            "{:<36}  {:<20} {:<10} {}",
            p.id,
            p.name,
            p.status.as_str(),
            p.root_path
        );
    }
    Ok(())
}
