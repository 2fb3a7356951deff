use batch_job_operator::crd::Job;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    println!("---");
    println!("# Job CRD");
    println!("{}", serde_yaml::to_string(&Job::crd())?);
    Ok(())
}
