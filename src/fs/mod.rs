use std::{
    cell::{OnceCell, RefCell},
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek},
    path::{Path, PathBuf},
    rc::Rc,
};

use anyhow::{anyhow, bail};
use tempfile::TempDir;

pub trait StoreFile: std::fmt::Debug + Read + Seek {
    fn write(&mut self, buf: &[u8]) -> anyhow::Result<()>;
    fn len(&self) -> anyhow::Result<u64>;
}

// Handles are cheap to clone and every clone names the same directory. Files
// are opened read/write; callers seek to wherever they need to be.
pub trait StoreDir: Clone + std::fmt::Debug {
    type File: StoreFile;

    /// Returns None if the file already exists.
    fn create<P>(&mut self, fname: &P) -> anyhow::Result<Option<Self::File>>
    where
        P: AsRef<Path>;

    /// Returns None if the file does not exist.
    fn open<P>(&mut self, fname: &P) -> anyhow::Result<Option<Self::File>>
    where
        P: AsRef<Path>;

    /// Returns whether there was anything to remove.
    fn unlink<P>(&mut self, fname: &P) -> anyhow::Result<bool>
    where
        P: AsRef<Path>;

    fn ls(&mut self) -> anyhow::Result<Vec<String>>;
}

// Real filesystem.

#[derive(Debug)]
pub struct OsFile {
    file: File,
}

impl Read for OsFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for OsFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl StoreFile for OsFile {
    fn write(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        io::Write::write_all(&mut self.file, buf)?;
        Ok(())
    }

    fn len(&self) -> anyhow::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

// Temporary directories are removed, with everything in them, once the last
// handle is dropped.
#[derive(Clone, Debug)]
enum Root {
    Fixed(PathBuf),
    Temp(Rc<TempDir>),
    // Made by the first `create`; shared by every clone.
    Deferred(Rc<OnceCell<TempDir>>),
}

#[derive(Clone, Debug)]
pub struct OsDir {
    root: Root,
}

fn new_temp_dir() -> anyhow::Result<TempDir> {
    Ok(tempfile::Builder::new().prefix("hugeset").tempdir()?)
}

impl OsDir {
    pub fn new<P: Into<PathBuf>>(path: P) -> anyhow::Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        Ok(OsDir {
            root: Root::Fixed(path),
        })
    }

    pub fn temp() -> anyhow::Result<Self> {
        Ok(OsDir {
            root: Root::Temp(Rc::new(new_temp_dir()?)),
        })
    }

    /// A temporary directory that does not exist until a file is created in
    /// it.
    pub fn lazy_temp() -> Self {
        OsDir {
            root: Root::Deferred(Rc::new(OnceCell::new())),
        }
    }

    /// None until a deferred directory has been created.
    pub fn path(&self) -> Option<&Path> {
        match &self.root {
            Root::Fixed(path) => Some(path.as_path()),
            Root::Temp(dir) => Some(dir.path()),
            Root::Deferred(cell) => cell.get().map(|dir| dir.path()),
        }
    }

    fn path_for_create(&self) -> anyhow::Result<&Path> {
        if let Root::Deferred(cell) = &self.root {
            if cell.get().is_none() {
                let _ = cell.set(new_temp_dir()?);
            }
        }
        self.path()
            .ok_or_else(|| anyhow!("temporary directory was not created"))
    }
}

impl StoreDir for OsDir {
    type File = OsFile;

    fn create<P>(&mut self, fname: &P) -> anyhow::Result<Option<OsFile>>
    where
        P: AsRef<Path>,
    {
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(self.path_for_create()?.join(fname))
        {
            Ok(file) => Ok(Some(OsFile { file })),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn open<P>(&mut self, fname: &P) -> anyhow::Result<Option<OsFile>>
    where
        P: AsRef<Path>,
    {
        let Some(path) = self.path() else {
            return Ok(None);
        };
        match OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.join(fname))
        {
            Ok(file) => Ok(Some(OsFile { file })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn unlink<P>(&mut self, fname: &P) -> anyhow::Result<bool>
    where
        P: AsRef<Path>,
    {
        let Some(path) = self.path() else {
            return Ok(false);
        };
        match fs::remove_file(path.join(fname)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn ls(&mut self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        let Some(path) = self.path() else {
            return Ok(names);
        };
        for entry in fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

// Mock Implementation

#[derive(Clone, Debug)]
pub struct MockFile {
    idx: usize,
    pub file_id: FileId,
    fs: Rc<RefCell<MockFs>>,
}

impl Seek for MockFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let len = (*self.fs).borrow().data[self.file_id].len() as i64;
        let target = match pos {
            io::SeekFrom::Start(i) => i as i64,
            io::SeekFrom::End(i) => len + i,
            io::SeekFrom::Current(x) => self.idx as i64 + x,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.idx = target as usize;
        Ok(self.idx as u64)
    }
}

impl Read for MockFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut fs = (*self.fs).borrow_mut();
        if fs.perform_op().is_err() {
            return Err(io::Error::new(io::ErrorKind::Other, "filesystem is down"));
        }
        let data = &fs.data[self.file_id];
        let start = std::cmp::min(self.idx, data.len());
        let min_len = std::cmp::min(data.len() - start, buf.len());
        buf[..min_len].copy_from_slice(&data[start..start + min_len]);
        self.idx += min_len;
        Ok(min_len)
    }
}

impl StoreFile for MockFile {
    fn write(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        (*self.fs)
            .borrow_mut()
            .write(self.file_id, self.idx, buf.to_vec())?;
        self.idx += buf.len();

        Ok(())
    }

    fn len(&self) -> anyhow::Result<u64> {
        Ok((*self.fs).borrow().data[self.file_id].len() as u64)
    }
}

#[derive(Clone, Debug)]
pub struct MockDir {
    pub fs: Rc<RefCell<MockFs>>,
}

impl MockDir {
    pub fn new() -> Self {
        MockDir {
            fs: Rc::new(RefCell::new(MockFs::new())),
        }
    }

    fn name<P>(p: &P) -> String
    where
        P: AsRef<Path>,
    {
        p.as_ref().to_string_lossy().into_owned()
    }
}

impl Default for MockDir {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreDir for MockDir {
    type File = MockFile;

    fn create<P>(&mut self, fname: &P) -> anyhow::Result<Option<MockFile>>
    where
        P: AsRef<Path>,
    {
        Ok((*self.fs)
            .borrow_mut()
            .create(Self::name(fname))?
            .map(|file_id| MockFile {
                fs: self.fs.clone(),
                file_id,
                idx: 0,
            }))
    }

    fn open<P>(&mut self, fname: &P) -> anyhow::Result<Option<MockFile>>
    where
        P: AsRef<Path>,
    {
        Ok((*self.fs)
            .borrow_mut()
            .open(Self::name(fname))?
            .map(|file_id| MockFile {
                fs: self.fs.clone(),
                file_id,
                idx: 0,
            }))
    }

    fn unlink<P>(&mut self, fname: &P) -> anyhow::Result<bool>
    where
        P: AsRef<Path>,
    {
        (*self.fs).borrow_mut().unlink(Self::name(fname))
    }

    fn ls(&mut self) -> anyhow::Result<Vec<String>> {
        let mut fs = (*self.fs).borrow_mut();
        let mut fnames: Vec<String> = fs.names.keys().cloned().collect();
        fnames.sort();
        fs.record(Event::Ls(fnames.clone()));
        Ok(fnames)
    }
}

pub type FileId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Create(String, FileId),
    Open(String),
    Write(FileId, usize, usize),
    Unlink(String),
    Ls(Vec<String>),
}

impl Event {
    pub fn write_abbrev<W: std::fmt::Write>(&self, w: &mut W) -> std::fmt::Result {
        match self {
            Event::Create(name, file_id) => write!(w, "Create({}, {})", name, file_id),
            Event::Open(name) => write!(w, "Open({})", name),
            Event::Write(file_id, idx, len) => write!(w, "Write({}, {}, {})", file_id, idx, len),
            Event::Unlink(name) => write!(w, "Unlink({})", name),
            Event::Ls(names) => write!(w, "Ls() -> {:?}", names),
        }
    }
}

#[derive(Debug)]
pub struct MockFs {
    names: HashMap<String, FileId>,
    data: Vec<Vec<u8>>,
    events: Vec<Event>,

    // After this many "things happen," "crash" the FS, meaning every further
    // operation fails.
    time_to_crash: Option<usize>,
}

impl MockFs {
    fn new() -> Self {
        MockFs {
            names: HashMap::new(),
            data: Vec::new(),
            events: Vec::new(),
            time_to_crash: None,
        }
    }

    fn check_crashed(&self) -> anyhow::Result<()> {
        if self.time_to_crash == Some(0) {
            bail!("filesystem is down")
        } else {
            Ok(())
        }
    }

    pub fn schedule_crash(&mut self, ops: usize) {
        self.time_to_crash = Some(ops);
    }

    pub fn recover(&mut self) {
        self.time_to_crash = None;
    }

    fn perform_op(&mut self) -> anyhow::Result<()> {
        self.check_crashed()?;
        if let Some(x) = self.time_to_crash {
            self.time_to_crash = Some(x - 1);
        }
        Ok(())
    }

    fn record(&mut self, e: Event) {
        self.events.push(e);
    }

    pub fn iter_events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn contents(&self, name: &str) -> Option<&[u8]> {
        self.names.get(name).map(|id| self.data[*id].as_slice())
    }

    fn create(&mut self, path: String) -> anyhow::Result<Option<FileId>> {
        self.perform_op()?;

        if self.names.contains_key(&path) {
            return Ok(None);
        }
        let id = self.data.len();
        self.record(Event::Create(path.clone(), id));
        self.names.insert(path, id);
        self.data.push(Vec::new());

        Ok(Some(id))
    }

    fn open(&mut self, path: String) -> anyhow::Result<Option<FileId>> {
        self.perform_op()?;

        let id = self.names.get(&path).cloned();
        self.record(Event::Open(path));
        Ok(id)
    }

    fn unlink(&mut self, path: String) -> anyhow::Result<bool> {
        self.perform_op()?;

        let removed = self.names.remove(&path).is_some();
        self.record(Event::Unlink(path));
        Ok(removed)
    }

    fn write(&mut self, file: FileId, idx: usize, data: Vec<u8>) -> anyhow::Result<()> {
        self.perform_op()?;

        let f = &mut self.data[file];
        if f.len() < idx + data.len() {
            f.resize(idx + data.len(), 0);
        }
        f[idx..idx + data.len()].copy_from_slice(&data);

        self.record(Event::Write(file, idx, data.len()));
        Ok(())
    }
}
