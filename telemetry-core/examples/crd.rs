//! A script used to generate the CRDs owned by this project.
//!
//! Any time a CRD spec changes, this script can be run to ensure that the CRDs are up-to-date and
//! ready to be synced with the cluster. The output path defaults to `../k8s/crds`, and may be
//! overridden by the first argument.

use anyhow::{Context, Result};
use kube::CustomResourceExt;
use telemetry_core::crd::TracePipeline;

fn main() -> Result<()> {
    let crds_path = match std::env::args().nth(1) {
        Some(path) => std::path::PathBuf::from(path),
        None => {
            let canon = std::fs::canonicalize("..").context("error getting canonical path of current dir")?;
            canon.join("k8s").join("crds")
        }
    };
    std::fs::create_dir_all(&crds_path).with_context(|| format!("error creating CRD dir {:?}", &crds_path))?;

    let pipeline = TracePipeline::crd();
    let pipeline_yaml = serde_yaml::to_string(&pipeline).context("error serializing TracePipeline CRD to yaml")?;
    std::fs::write(crds_path.join("tracepipeline.yaml"), &pipeline_yaml)
        .with_context(|| format!("error writing TracePipeline CRD to {:?}", &crds_path))?;
    println!("TracePipeline CRD written to {:?}", &crds_path);

    Ok(())
}
