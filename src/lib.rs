pub mod cc;
pub mod error;
pub mod layer;
pub mod report;
pub mod sim;
pub mod workload;

#[cfg(test)]
mod test;
