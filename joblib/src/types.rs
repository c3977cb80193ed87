use uuid::Uuid;

pub type Program = String;
pub type Args = Vec<String>;
pub type JobId = Uuid;
pub type OutputBlob = bytes::Bytes;

/// A program and the arguments it is launched with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Command {
    pub program: Program,
    pub args: Args,
}

impl Command {
    pub fn new(program: impl Into<Program>, args: Args) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}
