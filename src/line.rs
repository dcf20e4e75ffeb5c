/// A single line of source text annotated with its provenance.
///
/// Produced by the preprocessor and carried unchanged through both assembler
/// passes so that every diagnostic and debug record can point back at the
/// exact file and line that produced it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SrcLine {
    /// Original line text, verbatim (comments included).
    pub text: String,
    /// Canonicalized path of the file this line came from.
    pub file: String,
    /// 1-based line number within `file`.
    pub line_no: u32,
    /// Include chain from the entry file down to `file`.
    pub chain: Vec<String>,
}

impl SrcLine {
    pub fn new(text: impl Into<String>, file: impl Into<String>, line_no: u32) -> Self {
        let file = file.into();
        SrcLine {
            text: text.into(),
            chain: vec![file.clone()],
            file,
            line_no,
        }
    }

    /// A line with no real source position, for errors that predate layout
    /// (e.g. an empty compilation with no `.org`).
    pub fn synthetic(file: impl Into<String>) -> Self {
        SrcLine {
            text: String::new(),
            file: file.into(),
            line_no: 0,
            chain: Vec::new(),
        }
    }

    pub fn location(&self) -> String {
        format!("{}:{}", self.file, self.line_no)
    }
}
