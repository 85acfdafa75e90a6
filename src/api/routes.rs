use std::fmt;
use std::sync::Arc;

use actix_web::{web, HttpRequest};

use crate::errors::AppError;

/// The resources served under `/api/v1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Bootcamps,
    Courses,
    Auth,
    Users,
    Reviews,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Bootcamps,
        Resource::Courses,
        Resource::Auth,
        Resource::Users,
        Resource::Reviews,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Resource::Bootcamps => "bootcamps",
            Resource::Courses => "courses",
            Resource::Auth => "auth",
            Resource::Users => "users",
            Resource::Reviews => "reviews",
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Resource::Bootcamps => "/api/v1/bootcamps",
            Resource::Courses => "/api/v1/courses",
            Resource::Auth => "/api/v1/auth",
            Resource::Users => "/api/v1/users",
            Resource::Reviews => "/api/v1/reviews",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handlers for one resource, registered relative to its prefix.
pub trait RouteGroup: Send + Sync + 'static {
    fn configure(&self, cfg: &mut web::ServiceConfig);
}

impl<F> RouteGroup for F
where
    F: Fn(&mut web::ServiceConfig) + Send + Sync + 'static,
{
    fn configure(&self, cfg: &mut web::ServiceConfig) {
        self(cfg)
    }
}

/// Stand-in for a resource whose handlers are not mounted.
struct Unmounted(Resource);

impl RouteGroup for Unmounted {
    fn configure(&self, cfg: &mut web::ServiceConfig) {
        let resource = self.0;
        let handler = move |req: HttpRequest| async move {
            Err::<actix_web::HttpResponse, _>(AppError::NotImplemented(format!(
                "{} handlers are not mounted ({} {})",
                resource,
                req.method(),
                req.path()
            )))
        };
        cfg.route("", web::to(handler))
            .route("/{tail:.*}", web::to(handler));
    }
}

/// Binds every [`Resource`] prefix to a [`RouteGroup`].
#[derive(Clone)]
pub struct RouteTable {
    groups: Vec<(Resource, Arc<dyn RouteGroup>)>,
}

impl RouteTable {
    /// Every resource answers `501 Not Implemented` until mounted.
    pub fn unmounted() -> Self {
        let groups = Resource::ALL
            .iter()
            .map(|&resource| (resource, Arc::new(Unmounted(resource)) as Arc<dyn RouteGroup>))
            .collect();
        Self { groups }
    }

    /// Replaces the group serving `resource`.
    pub fn mount(mut self, resource: Resource, group: impl RouteGroup) -> Self {
        let group: Arc<dyn RouteGroup> = Arc::new(group);
        if let Some(slot) = self.groups.iter_mut().find(|(r, _)| *r == resource) {
            slot.1 = group;
        }
        self
    }

    pub fn resources(&self) -> impl Iterator<Item = Resource> + '_ {
        self.groups.iter().map(|(resource, _)| *resource)
    }

    /// Registers one scope per resource.
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        for (resource, group) in &self.groups {
            let group = Arc::clone(group);
            cfg.service(web::scope(resource.prefix()).configure(move |scope| group.configure(scope)));
        }
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::unmounted()
    }
}

pub async fn not_found(req: HttpRequest) -> Result<actix_web::HttpResponse, AppError> {
    Err(AppError::NotFound(format!("Route {} {}", req.method(), req.path())))
}
