pub mod mask;
pub mod raster;
pub mod shapes;
