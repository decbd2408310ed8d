/// What a benchmark input holds, which decides the decoder it is fed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireKind {
    RequestHead,
    ResponseHead,
    ChunkedBody,
}

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    kind: WireKind,
    file: TestFile,
}

impl TestCase {
    pub fn new(name: &'static str, kind: WireKind, file: TestFile) -> Self {
        Self { name, kind, file }
    }

    pub fn request(name: &'static str, file: TestFile) -> Self {
        Self::new(name, WireKind::RequestHead, file)
    }

    pub fn response(name: &'static str, file: TestFile) -> Self {
        Self::new(name, WireKind::ResponseHead, file)
    }

    pub fn chunked(name: &'static str, file: TestFile) -> Self {
        Self::new(name, WireKind::ChunkedBody, file)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> WireKind {
        self.kind
    }

    pub fn file(&self) -> &TestFile {
        &self.file
    }

    pub fn bytes(&self) -> u64 {
        self.file.content.len() as u64
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TestFile {
    file_name: &'static str,
    content: &'static str,
}

impl TestFile {
    pub const fn new(file_name: &'static str, content: &'static str) -> Self {
        Self { file_name, content }
    }

    pub fn content(&self) -> &'static str {
        self.content
    }

    pub fn file_name(&self) -> &'static str {
        self.file_name
    }
}
