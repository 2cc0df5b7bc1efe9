use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use rustc_hash::FxHashMap;

use crate::charclass::{CharClass, Encoding, Error, LoadError};
use crate::config::Config;

/// Highest Unicode code point.
const MAX_CODE_POINT: u32 = 0x10FFFF;

/// Cache of character classes loaded from files.
///
/// Every class is parsed only once, subsequent loads of the same path
/// return a clone of the cached class, which the caller can modify freely.
/// The registry also caches the "any character" class of each encoding.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    search_path: Option<PathBuf>,
    loaded: FxHashMap<PathBuf, CharClass>,
    any: FxHashMap<Encoding, CharClass>,
}

impl ClassRegistry {
    /// Creates an empty registry without a search path for pre-built
    /// classes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry that looks for pre-built classes in
    /// `search_path`. Classes are expected in one directory per encoding,
    /// named after the canonical name of the encoding.
    pub fn with_search_path<P: Into<PathBuf>>(search_path: P) -> Self {
        Self { search_path: Some(search_path.into()), ..Default::default() }
    }

    /// Creates an empty registry configured from [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self {
            search_path: config.classes.search_path.clone(),
            ..Default::default()
        }
    }

    /// Returns the path of a pre-built class, if the registry has a search
    /// path.
    pub fn class_path(&self, encoding: Encoding, name: &str) -> Option<PathBuf> {
        self.search_path
            .as_ref()
            .map(|path| path.join(encoding.name()).join(name))
    }

    /// Loads a class from a file, or returns a copy of the class if it was
    /// loaded before.
    pub fn load<P: AsRef<Path>>(
        &mut self,
        path: P,
    ) -> Result<CharClass, LoadError> {
        let path = path.as_ref();

        if let Some(class) = self.loaded.get(path) {
            debug!("character class {} found in cache", path.display());
            return Ok(class.clone());
        }

        let class = CharClass::from_file(path)?;
        self.loaded.insert(path.to_path_buf(), class.clone());

        Ok(class)
    }

    /// Returns the union of the classes in the given files.
    ///
    /// Files that don't exist are skipped, as not every class is available
    /// for every encoding. Callers that need all of them must check.
    pub fn union_of<I, P>(
        &mut self,
        encoding: Encoding,
        paths: I,
    ) -> Result<CharClass, Error>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut result = CharClass::new(encoding);
        for path in paths {
            match self.load(path) {
                Ok(class) => {
                    result.union(&class)?;
                }
                Err(LoadError::Io(err))
                    if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(result)
    }

    /// Returns the class with every character that can be represented in
    /// the given encoding.
    ///
    /// A pre-built `any` class is used if found in the search path,
    /// otherwise the class is built from the whole range of code points.
    pub fn any(&mut self, encoding: Encoding) -> CharClass {
        if let Some(class) = self.any.get(&encoding) {
            return class.clone();
        }

        let prebuilt = self
            .class_path(encoding, "any")
            .filter(|path| path.is_file())
            .and_then(|path| self.load(path).ok())
            .filter(|class| class.encoding() == encoding && !class.is_empty());

        let class = match prebuilt {
            Some(class) => class,
            None => {
                debug!("building `any` class for {}", encoding);
                CharClass::from_range(encoding, 0, MAX_CODE_POINT)
            }
        };

        self.any.insert(encoding, class.clone());
        class
    }
}
