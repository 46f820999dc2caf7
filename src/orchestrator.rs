use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::{info, warn};
use parking_lot::{Condvar, Mutex};

use crate::api::{
    DatasetInfo, DatasetRequest, GroupListing, ReadOptions, Scheduling, VariableInfo,
    canonical_path,
};
use crate::error::H5Error;
use crate::h5::chunk::{ChunkReader, copy_slice};
use crate::h5::header::{HeaderWalk, WalkOptions};
use crate::h5::superblock::{FileContext, read_superblock};
use crate::hyperslice::{self, DimSpec, Span};
use crate::io::{Driver, FileDriver, Source};
use crate::meta::{DataType, Layout, Metadata, Registry};
use crate::promise::Promise;
use crate::values::DatasetValues;

/// An opened HDF5 resource: driver, line cache, file parameters and the
/// path/metadata registries, plus the scheduling of per-dataset workers.
pub struct H5File {
    inner: Arc<Resource>,
}

struct Resource {
    source: Source,
    ctx: FileContext,
    registry: Mutex<Registry>,
    closed: AtomicBool,
    active: Mutex<usize>,
    drained: Condvar,
}

impl Resource {
    fn worker_started(&self) {
        *self.active.lock() += 1;
    }

    fn worker_finished(&self) {
        let mut active = self.active.lock();
        *active -= 1;
        if *active == 0 {
            self.drained.notify_all();
        }
    }
}

impl H5File {
    /// Open over an already-constructed driver. Runs the superblock reader
    /// and prepares empty registries.
    pub fn open_with(driver: Box<dyn Driver>) -> Result<Self, H5Error> {
        let source = Source::new(driver);
        let ctx = read_superblock(&source, true)?;
        Ok(Self {
            inner: Arc::new(Resource {
                source,
                ctx,
                registry: Mutex::new(Registry::default()),
                closed: AtomicBool::new(false),
                active: Mutex::new(0),
                drained: Condvar::new(),
            }),
        })
    }

    /// Open a local file.
    pub fn open_file(path: &str) -> Result<Self, H5Error> {
        info!("opening local file {path}");
        Self::open_with(Box::new(FileDriver::open(path)?))
    }

    /// Open an HTTP(S) URL, optionally with a bearer token.
    #[cfg(feature = "http")]
    pub fn open_url(url: &str, token: Option<&str>) -> Result<Self, H5Error> {
        info!("opening {url}");
        Self::open_with(Box::new(crate::io::HttpDriver::open(url, token)?))
    }

    /// Open an S3 object given as `bucket/key`. `max_connections` caps the
    /// driver's connection pool; `None` uses the driver default.
    #[cfg(feature = "s3")]
    pub fn open_s3(
        resource: &str,
        credentials: crate::io::S3Credentials,
        max_connections: Option<usize>,
    ) -> Result<Self, H5Error> {
        info!("opening s3 object {resource}");
        Self::open_with(Box::new(crate::io::S3Driver::open(
            resource,
            credentials,
            max_connections,
        )?))
    }

    /// Submit one worker per requested dataset and return the promise that
    /// collects their results. With `options.block` the call waits for all
    /// workers; otherwise results are filled in as workers complete, on a
    /// best-effort basis.
    pub fn read_datasets(
        &self,
        requests: &[DatasetRequest],
        options: ReadOptions,
    ) -> Result<Promise, H5Error> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(H5Error::Closed);
        }

        let work: Vec<(String, Vec<DimSpec>)> = requests
            .iter()
            .map(|r| (canonical_path(&r.dataset), r.hyperslice.clone()))
            .collect();
        let paths: Vec<String> = work.iter().map(|(p, _)| p.clone()).collect();
        let promise = Promise::new(&paths);

        for (path, spec) in work {
            let res = Arc::clone(&self.inner);
            let promise = promise.clone();
            res.worker_started();
            thread::spawn(move || {
                let result = read_one(&res, &path, &spec, &options).map(Arc::new);
                promise.fulfill(&path, result);
                res.worker_finished();
            });
        }

        if options.block {
            promise.wait_all();
        }
        Ok(promise)
    }

    /// Blocking convenience read of a single dataset.
    pub fn read_dataset(
        &self,
        dataset: &str,
        hyperslice: &[DimSpec],
    ) -> Result<Arc<DatasetValues>, H5Error> {
        let request = DatasetRequest {
            dataset: dataset.to_string(),
            hyperslice: hyperslice.to_vec(),
        };
        let promise = self.read_datasets(std::slice::from_ref(&request), ReadOptions::default())?;
        promise.get(&canonical_path(dataset))
    }

    /// Resolve one dataset's metadata, and its attribute values when
    /// `with_attr` is set, without reading the data.
    pub fn describe(&self, dataset: &str, with_attr: bool) -> Result<DatasetInfo, H5Error> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(H5Error::Closed);
        }
        let res = &self.inner;
        let path = canonical_path(dataset);
        let opts = WalkOptions {
            early_exit: true,
            enable_attributes: with_attr,
            error_checking: true,
            strict: false,
        };
        let meta = HeaderWalk::new(&res.source, &res.ctx, &res.registry, &path, opts).resolve()?;
        if !meta.is_resolved() {
            return Err(H5Error::Format(format!(
                "missing data type information for {path}"
            )));
        }

        let mut attributes = BTreeMap::new();
        if with_attr {
            for (name, attr_meta) in attribute_records(res, &path) {
                attributes.insert(name, materialize(&res.source, &res.ctx, attr_meta, &[], true, true)?);
            }
        }
        Ok(DatasetInfo {
            metadata: meta,
            attributes,
        })
    }

    /// List one group: variables (with attribute values when `with_attr`),
    /// the group's own attributes, and child group names.
    pub fn list(&self, group: &str, with_attr: bool) -> Result<GroupListing, H5Error> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(H5Error::Closed);
        }
        let res = &self.inner;
        let group = canonical_path(group);
        let opts = WalkOptions {
            early_exit: true,
            enable_attributes: with_attr,
            error_checking: true,
            strict: false,
        };
        HeaderWalk::new(&res.source, &res.ctx, &res.registry, &group, opts).resolve()?;

        let prefix = if group.is_empty() {
            String::new()
        } else {
            format!("{group}/")
        };

        let mut listing = GroupListing::default();
        for (name, attr_meta) in attribute_records(res, &group) {
            listing
                .attributes
                .insert(name, materialize(&res.source, &res.ctx, attr_meta, &[], true, true)?);
        }

        let children: Vec<String> = {
            let reg = res.registry.lock();
            let mut names: Vec<String> = reg
                .addresses
                .keys()
                .filter_map(|key| key.strip_prefix(&prefix))
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .filter(|rest| {
                    // Attribute records share the address registry; they are
                    // listed separately.
                    !reg
                        .metadata
                        .get(&format!("{prefix}{rest}"))
                        .is_some_and(|m| m.is_attribute)
                })
                .map(str::to_string)
                .collect();
            names.sort();
            names.dedup();
            names
        };

        for name in children {
            let child_path = format!("{prefix}{name}");
            let child_opts = WalkOptions {
                early_exit: true,
                enable_attributes: with_attr,
                error_checking: true,
                strict: false,
            };
            let meta =
                HeaderWalk::new(&res.source, &res.ctx, &res.registry, &child_path, child_opts)
                    .resolve()?;
            if meta.is_resolved() {
                let mut attributes = BTreeMap::new();
                if with_attr {
                    for (attr_name, attr_meta) in attribute_records(res, &child_path) {
                        attributes.insert(
                            attr_name,
                            materialize(&res.source, &res.ctx, attr_meta, &[], true, true)?,
                        );
                    }
                }
                listing.variables.insert(
                    name,
                    VariableInfo {
                        metadata: meta,
                        attributes,
                    },
                );
            } else {
                listing.groups.push(name);
            }
        }
        Ok(listing)
    }

    /// Refuse new reads and release the driver once in-flight workers have
    /// drained.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut active = self.inner.active.lock();
        while *active > 0 {
            self.inner.drained.wait(&mut active);
        }
        drop(active);
        self.inner.source.close();
    }
}

/// Attribute records registered directly under `path`, as (name, record).
fn attribute_records(res: &Resource, path: &str) -> Vec<(String, Metadata)> {
    let prefix = if path.is_empty() {
        String::new()
    } else {
        format!("{path}/")
    };
    let reg = res.registry.lock();
    let mut records: Vec<(String, Metadata)> = reg
        .metadata
        .iter()
        .filter(|(_, m)| m.is_attribute)
        .filter_map(|(key, m)| {
            key.strip_prefix(&prefix)
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .map(|rest| (rest.to_string(), m.clone()))
        })
        .collect();
    records.sort_by(|a, b| a.0.cmp(&b.0));
    records
}

/// One worker's job: resolve metadata (through the registries), then read
/// and materialize the dataset.
fn read_one(
    res: &Resource,
    dataset: &str,
    spec: &[DimSpec],
    options: &ReadOptions,
) -> Result<DatasetValues, H5Error> {
    if res.closed.load(Ordering::Acquire) {
        return Err(H5Error::Closed);
    }

    // Independent workers get a duplicated driver and a private cache.
    let owned_source;
    let src: &Source = match options.scheduling {
        Scheduling::Shared => &res.source,
        Scheduling::Independent => {
            owned_source = res.source.duplicate()?;
            &owned_source
        }
    };

    let cached = res.registry.lock().metadata.get(dataset).cloned();
    let meta = match cached {
        Some(meta) if meta.is_resolved() && options.early_exit => meta,
        cached => {
            let walk_opts = WalkOptions {
                early_exit: options.early_exit,
                enable_attributes: options.enable_attributes,
                error_checking: options.error_checking,
                strict: options.strict,
            };
            let walked =
                HeaderWalk::new(src, &res.ctx, &res.registry, dataset, walk_opts).resolve()?;
            if walked.is_resolved() {
                res.registry
                    .lock()
                    .metadata
                    .insert(dataset.to_string(), walked.clone());
                walked
            } else {
                cached.filter(|m| m.is_resolved()).unwrap_or(walked)
            }
        }
    };

    if options.meta_only {
        return Ok(DatasetValues::meta_only(meta));
    }

    materialize(src, &res.ctx, meta, spec, options.error_checking, options.enable_fill)
        .map_err(|e| match e {
            H5Error::Format(msg) => H5Error::Format(format!("{dataset}: {msg}")),
            other => other,
        })
}

/// Read a metadata record's data for the given selection and wrap it as a
/// typed result.
fn materialize(
    src: &Source,
    ctx: &FileContext,
    meta: Metadata,
    spec: &[DimSpec],
    error_checking: bool,
    enable_fill: bool,
) -> Result<DatasetValues, H5Error> {
    if meta.type_size == 0 {
        return Err(H5Error::Format("missing data type information".into()));
    }
    let Some(ndims) = meta.ndims else {
        return Err(H5Error::Format("missing data dimension information".into()));
    };
    if meta.address == ctx.undef() {
        return Err(H5Error::Format("invalid data address".into()));
    }
    if (meta.filter.deflate || meta.filter.shuffle)
        && matches!(meta.layout, Some(Layout::Compact) | Some(Layout::Contiguous))
    {
        return Err(H5Error::Format(
            "filters are unsupported on non-chunked layouts".into(),
        ));
    }
    if let Some(name) = meta.filter.unsupported() {
        return Err(H5Error::Unsupported(format!("{name} filter")));
    }

    let spans = hyperslice::normalize(spec, &meta.dimensions)?;
    let shape = hyperslice::shape(&spans);
    let elements = hyperslice::element_count(&spans);
    let buffer_size = (elements as usize) * meta.type_size;
    if buffer_size == 0 {
        warn!("empty read: type_size={} elements={elements}", meta.type_size);
        return Ok(DatasetValues::raw(meta, shape, Vec::new()));
    }

    let mut buffer = vec![0u8; buffer_size];
    match meta.layout {
        Some(Layout::Compact) | Some(Layout::Contiguous) => {
            let full_extent = spans
                .iter()
                .zip(&meta.dimensions)
                .all(|(s, &d)| s.lo == 0 && s.hi == d);
            if ndims == 0 || full_extent {
                buffer = src.read_direct(meta.address, buffer_size)?;
            } else {
                // Partial selection: fetch the whole region once and carve
                // the selection out of it.
                let total = (meta.elements() as usize) * meta.type_size;
                let region = src.read_direct(meta.address, total)?;
                let dst_slice: Vec<Span> =
                    shape.iter().map(|&len| Span::new(0, len)).collect();
                copy_slice(
                    &mut buffer,
                    &shape,
                    &dst_slice,
                    &region,
                    &meta.dimensions,
                    &spans,
                    meta.type_size,
                );
            }
        }
        Some(Layout::Chunked) => {
            let reader = ChunkReader::new(src, ctx, &meta, &spans, error_checking, enable_fill)?;
            reader.read_into(&mut buffer)?;
        }
        None => {
            if error_checking {
                return Err(H5Error::Format("invalid data layout".into()));
            }
        }
    }

    match meta.datatype {
        Some(DataType::FixedPoint) | Some(DataType::FloatingPoint) => {
            Ok(DatasetValues::raw(meta, shape, buffer))
        }
        Some(DataType::String) => {
            let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
            let text = String::from_utf8_lossy(&buffer[..end]).to_string();
            Ok(DatasetValues::text(meta, shape, text))
        }
        other => {
            warn!("datatype {other:?} cannot be decoded; returning raw bytes");
            Ok(DatasetValues::raw(meta, shape, buffer))
        }
    }
}
