//! Print the CustomResourceDefinition YAML for every FleetCap kind
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/fleetcap.yaml`

use crds::{AdHocCommand, DataEndpoint, PacketCapture, ScheduledCommand};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        AdHocCommand::crd(),
        ScheduledCommand::crd(),
        PacketCapture::crd(),
        DataEndpoint::crd(),
    ];

    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
