use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not open the store")]
    Store,
    #[display("could not open the job queue")]
    Queue,
    #[display("could not set up the {_0} mirror")]
    Mirror(#[error(not(source))] String),
    #[display("indexing failed")]
    Pipeline,
    #[display("query failed")]
    Query,
    #[display("could not write output")]
    Output,
}
