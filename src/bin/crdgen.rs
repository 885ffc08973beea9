//! Prints the VirtualDatabase CRD as YAML

use kube::CustomResourceExt;
use vdb_operator::crd::VirtualDatabase;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&VirtualDatabase::crd())?);
    Ok(())
}
