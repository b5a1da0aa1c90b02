/// An integer token of a program file. The text is kept so that values that
/// don't fit a word can be reported with their position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Number {
    pub text: String,
    // byte offset in the source
    pub pos: usize,
}
