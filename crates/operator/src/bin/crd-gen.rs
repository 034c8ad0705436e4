use clap::Parser;
use kube::CustomResourceExt;
use onedemo_operator::{rbac, App};

/// Prints the App CRD (or the RBAC roles) as YAML for `kubectl apply -f -`.
#[derive(Parser)]
#[command(name = "crd-gen", version)]
struct Args {
    /// Print the manager and leader-election roles instead of the CRD
    #[arg(long)]
    rbac: bool,
    /// Namespace for the leader-election Role
    #[arg(long, default_value = "system")]
    namespace: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.rbac {
        print!("{}", serde_yaml::to_string(&rbac::cluster_role(rbac::MANAGER_ROLE))?);
        println!("---");
        print!("{}", serde_yaml::to_string(&rbac::leader_election_role(rbac::LEADER_ELECTION_ROLE, Some(&args.namespace)))?);
    } else {
        print!("{}", serde_yaml::to_string(&App::crd())?);
    }
    Ok(())
}
