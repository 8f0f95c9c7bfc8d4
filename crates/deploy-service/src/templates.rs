//! Fixed text templates for generated configuration files

use crate::proxy::ProxyRoute;

/// Port a server-rendered application listens on inside its container
pub const SSR_PORT: u16 = 3000;

/// Port the static site web server listens on inside its container
pub const STATIC_PORT: u16 = 80;

/// Internal service port for a deployment
pub fn service_port(is_ssr: bool) -> u16 {
    if is_ssr {
        SSR_PORT
    } else {
        STATIC_PORT
    }
}

/// Container build descriptor
///
/// The SSR variant runs the app's start command with `PUBLIC_URL` set to
/// its route; the static variant serves `static_output_dir` through nginx.
pub fn dockerfile(is_ssr: bool, url_path: &str, static_output_dir: &str) -> String {
    if is_ssr {
        format!(
            "FROM node:18-alpine\n\
             WORKDIR /app\n\
             COPY . .\n\
             ENV NODE_ENV=production\n\
             ENV PUBLIC_URL={url_path}\n\
             ENV PORT={SSR_PORT}\n\
             EXPOSE {SSR_PORT}\n\
             CMD [\"npm\", \"start\"]\n"
        )
    } else {
        format!(
            "FROM nginx:alpine\n\
             COPY ./{static_output_dir} /usr/share/nginx/html\n\
             COPY ./nginx.conf /etc/nginx/conf.d/default.conf\n\
             EXPOSE {STATIC_PORT}\n\
             CMD [\"nginx\", \"-g\", \"daemon off;\"]\n"
        )
    }
}

/// Site config for the static variant's nginx
pub fn static_site_config() -> String {
    format!(
        "server {{\n\
         \x20   listen {STATIC_PORT};\n\
         \x20   root /usr/share/nginx/html;\n\
         \x20   index index.html;\n\
         \n\
         \x20   location / {{\n\
         \x20       try_files $uri $uri/ /index.html;\n\
         \x20   }}\n\
         }}\n"
    )
}

/// The shared reverse proxy server block with one location per route
pub fn proxy_config<'a>(routes: impl IntoIterator<Item = &'a ProxyRoute>) -> String {
    let mut config = String::from(
        "server {\n    listen 80;\n    server_name localhost;\n\n    # Auto-generated reverse proxy configuration\n",
    );

    for route in routes {
        config.push_str(&location_block(route));
    }

    config.push_str("}\n");
    config
}

fn location_block(route: &ProxyRoute) -> String {
    format!(
        "\n    location {} {{\n        proxy_pass {};\n        proxy_set_header Host $host;\n        proxy_set_header X-Real-IP $remote_addr;\n    }}\n",
        route.location, route.upstream
    )
}

/// Recover the routes from a configuration written by [`proxy_config`]
///
/// Anything that is not a `location` block with a `proxy_pass` is ignored.
pub fn parse_proxy_routes(config: &str) -> Vec<ProxyRoute> {
    let mut routes = Vec::new();
    let mut location: Option<&str> = None;

    for line in config.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("location ") {
            location = rest
                .strip_suffix('{')
                .map(str::trim)
                .filter(|path| !path.is_empty());
        } else if let Some(rest) = line.strip_prefix("proxy_pass ") {
            let upstream = rest.trim_end_matches(';').trim();
            if let Some(path) = location.take() {
                if !upstream.is_empty() {
                    routes.push(ProxyRoute::new(path, upstream));
                }
            }
        } else if line == "}" {
            location = None;
        }
    }

    routes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssr_dockerfile() {
        let dockerfile = dockerfile(true, "/demo_1/", "build");

        assert!(dockerfile.starts_with("FROM node:18-alpine\n"));
        assert!(dockerfile.contains("ENV PUBLIC_URL=/demo_1/\n"));
        assert!(dockerfile.contains("EXPOSE 3000\n"));
        assert!(dockerfile.contains("CMD [\"npm\", \"start\"]"));
        assert!(!dockerfile.contains("nginx"));
    }

    #[test]
    fn test_static_dockerfile() {
        let dockerfile = dockerfile(false, "/demo_1/", "dist");

        assert!(dockerfile.starts_with("FROM nginx:alpine\n"));
        assert!(dockerfile.contains("COPY ./dist /usr/share/nginx/html\n"));
        assert!(dockerfile.contains("COPY ./nginx.conf /etc/nginx/conf.d/default.conf\n"));
        assert!(dockerfile.contains("EXPOSE 80\n"));
    }

    #[test]
    fn test_static_site_config() {
        let config = static_site_config();

        assert!(config.starts_with("server {\n    listen 80;\n"));
        assert!(config.contains("        try_files $uri $uri/ /index.html;\n"));
        assert!(config.trim_end().ends_with('}'));
    }

    #[test]
    fn test_empty_proxy_config() {
        let routes: Vec<ProxyRoute> = Vec::new();
        let config = proxy_config(&routes);

        assert!(config.contains("server_name localhost;"));
        assert!(!config.contains("location"));
        assert!(config.ends_with("}\n"));
    }

    #[test]
    fn test_proxy_config_with_routes() {
        let routes = vec![
            ProxyRoute::new("/a_1/", "http://app-aaaaaaaaaaaa:80/"),
            ProxyRoute::new("/b_2/", "http://app-bbbbbbbbbbbb:3000/"),
        ];

        let config = proxy_config(&routes);

        assert!(config.contains("    location /a_1/ {\n        proxy_pass http://app-aaaaaaaaaaaa:80/;\n"));
        assert!(config.contains("    location /b_2/ {\n        proxy_pass http://app-bbbbbbbbbbbb:3000/;\n"));
        assert_eq!(config.matches("location ").count(), 2);
        assert_eq!(config.matches('{').count(), config.matches('}').count());
    }

    #[test]
    fn test_parse_proxy_routes() {
        let routes = vec![
            ProxyRoute::new("/a_1/", "http://app-aaaaaaaaaaaa:80/"),
            ProxyRoute::new("/b_2/", "http://app-bbbbbbbbbbbb:3000/"),
        ];

        assert_eq!(parse_proxy_routes(&proxy_config(&routes)), routes);
    }

    #[test]
    fn test_parse_proxy_routes_skips_other_content() {
        let config = "server {\n    listen 80;\n    location /health {\n        return 200;\n    }\n    location /x_1/ {\n        proxy_pass http://app-x:80/;\n    }\n}\n";

        assert_eq!(
            parse_proxy_routes(config),
            vec![ProxyRoute::new("/x_1/", "http://app-x:80/")]
        );
        assert!(parse_proxy_routes("custom").is_empty());
    }

    #[test]
    fn test_service_port() {
        assert_eq!(service_port(true), 3000);
        assert_eq!(service_port(false), 80);
    }
}
