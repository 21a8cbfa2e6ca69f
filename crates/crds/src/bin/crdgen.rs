//! Prints the AWSBuild CRD manifest as YAML.

use kube::CustomResourceExt;

fn main() {
    #[allow(clippy::unwrap_used, reason = "generator binary, fail loudly")]
    let yaml = serde_yaml::to_string(&crds::AWSBuild::crd()).unwrap();
    println!("{yaml}");
}
