pub mod regression;

use clap::{Parser, Subcommand};

pub use regression::RegressionArgs;

#[derive(Parser, Debug)]
#[command(
    name = "lentil",
    version,
    about = "Composable Bayesian models fit by stochastic variational inference",
    long_about = "Composable Bayesian models fit by stochastic variational inference.\n\
		  Data files are delimited text matrices with a header line,\n\
		  optionally gzipped."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Bayesian linear regression",
        long_about = "Fit y ~ Normal(x w + b, sigma) by variational inference:\n\
		      (1) Read the covariates x and the response y\n\
		      (2) Optimize the ELBO by minibatch gradient steps\n\
		      (3) Write posterior means, parameters and records as JSON.\n"
    )]
    Regression(RegressionArgs),
}
