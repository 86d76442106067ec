use std::sync::Arc;

use anyhow::{bail, Context as _, Error};
use tracing::{event, Level};
use wharf_proto::HttpRequest;

use crate::{
    handler::HandlerFactory,
    path::PathTemplate,
    plugin::{PluginContext, ServicePlugin},
    IoHandler, SessionContext,
};

/// Session attribute holding the `PathParams` of the matched route.
pub const PATH_PARAMS: &str = "wharf.path_params";

struct Route {
    method: Option<String>,
    template: PathTemplate,
    type_id: String,
}

/// Maps request paths to handler type ids, created through the module's `HandlerFactory`.
pub struct RoutePlugin {
    routes: Vec<Route>,
    factory: Option<Arc<dyn HandlerFactory>>,
}

impl RoutePlugin {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            factory: None,
        }
    }

    /// Route any method on `template` to the handler registered as `type_id`.
    pub fn route(mut self, template: &str, type_id: impl Into<String>) -> Self {
        self.routes.push(Route {
            method: None,
            template: PathTemplate::new(template),
            type_id: type_id.into(),
        });
        self
    }

    pub fn route_method(
        mut self,
        method: impl Into<String>,
        template: &str,
        type_id: impl Into<String>,
    ) -> Self {
        self.routes.push(Route {
            method: Some(method.into()),
            template: PathTemplate::new(template),
            type_id: type_id.into(),
        });
        self
    }
}

impl Default for RoutePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ServicePlugin for RoutePlugin {
    fn name(&self) -> &str {
        "routes"
    }

    fn priority(&self) -> i32 {
        300
    }

    fn init_plugin(&mut self, cx: &PluginContext) -> Result<(), Error> {
        for route in &self.routes {
            if cx.factory().create(&route.type_id).is_none() {
                bail!("no handler registered for type id {:?}", route.type_id);
            }
        }

        self.factory = Some(cx.factory().clone());
        Ok(())
    }

    fn determine_io_handler(
        &self,
        request: &HttpRequest,
        cx: &mut SessionContext,
    ) -> Result<Option<Box<dyn IoHandler>>, Error> {
        let factory = self.factory.as_ref().context("route plugin not initialized")?;

        let found = self.routes.iter().find_map(|route| {
            let method_matches = route
                .method
                .as_deref()
                .map_or(true, |method| method.eq_ignore_ascii_case(request.method()));
            if !method_matches {
                return None;
            }

            route
                .template
                .resolve(request.path())
                .ok()
                .map(|params| (route, params))
        });

        let Some((route, params)) = found else {
            return Ok(None);
        };

        event!(Level::TRACE, template = route.template.as_str(), type_id = %route.type_id, "route matched");

        let handler = factory
            .create(&route.type_id)
            .with_context(|| format!("handler type {:?} disappeared", route.type_id))?;
        cx.attributes_mut().insert(PATH_PARAMS, params);

        Ok(Some(handler))
    }
}
