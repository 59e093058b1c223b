use isvc_manager::crd::service_instance::ServiceInstance;
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = ServiceInstance::crd();
    println!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
