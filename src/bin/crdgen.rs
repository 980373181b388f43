use kube::CustomResourceExt;
use fleetplane::crd::{AuditBackend, ControlPlane, Extension, ShootState};

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        Extension::crd(),
        AuditBackend::crd(),
        ControlPlane::crd(),
        ShootState::crd(),
    ];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
