mod lifecycle;
mod runtime;
mod scenarios;
mod services;
mod support;
