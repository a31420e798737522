// Copyright © 2018 Cormac O'Brien
//
// Permission is hereby granted, free of charge, to any person obtaining a copy of this software
// and associated documentation files (the "Software"), to deal in the Software without
// restriction, including without limitation the rights to use, copy, modify, merge, publish,
// distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all copies or
// substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING
// BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM,
// DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use std::{
    convert::From,
    fmt::{self, Display},
    io,
};

use failure::{Backtrace, Context, Fail};

#[derive(Debug)]
pub struct BspError {
    inner: Context<BspErrorKind>,
}

impl BspError {
    pub fn kind(&self) -> BspErrorKind {
        *self.inner.get_context()
    }

    pub(crate) fn bad_index(what: &'static str, index: i64, count: usize) -> BspError {
        BspErrorKind::BadIndex { what, index, count }.into()
    }
}

impl From<BspErrorKind> for BspError {
    fn from(kind: BspErrorKind) -> Self {
        BspError {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<BspErrorKind>> for BspError {
    fn from(inner: Context<BspErrorKind>) -> Self {
        BspError { inner }
    }
}

impl From<io::Error> for BspError {
    fn from(io_error: io::Error) -> Self {
        io_error.context(BspErrorKind::Truncated).into()
    }
}

impl Fail for BspError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl Display for BspError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Debug, Fail)]
pub enum BspErrorKind {
    #[fail(display = "Bad magic number {:?}", _0)]
    BadMagic([u8; 4]),
    #[fail(display = "Unsupported version {} for {:?}", version, magic)]
    BadVersion { magic: [u8; 4], version: i32 },
    #[fail(display = "File too short to hold a header")]
    TruncatedHeader,
    #[fail(display = "Lump {} lies outside the file", _0)]
    LumpOutOfBounds(usize),
    #[fail(display = "Lump {} has size {}, not a multiple of {}", lump, size, record)]
    BadLumpSize {
        lump: usize,
        size: usize,
        record: usize,
    },
    #[fail(display = "Lump {} must not be empty", _0)]
    EmptyLump(usize),
    #[fail(display = "Bad {} index {} (count is {})", what, index, count)]
    BadIndex {
        what: &'static str,
        index: i64,
        count: usize,
    },
    #[fail(display = "Surface {} has a bad patch grid ({}x{})", surface, width, height)]
    BadPatch {
        surface: usize,
        width: i32,
        height: i32,
    },
    #[fail(display = "Unexpected end of lump data")]
    Truncated,
}
